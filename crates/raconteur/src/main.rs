mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "raconteur", version, about = "Encode, decode and inspect raconteur messages")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "RACONTEUR_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_subcommand() {
        let cli = Cli::try_parse_from([
            "raconteur",
            "plan",
            "--dims-a",
            "4,3",
            "--pos-a",
            "1,1",
            "--dims-b",
            "2,2",
            "--pos-b",
            "0,0",
            "--count",
            "2,2",
        ])
        .expect("plan args should parse");

        assert!(matches!(cli.command, Command::Plan(_)));
    }

    #[test]
    fn encode_requires_output() {
        let err = Cli::try_parse_from(["raconteur", "encode", "entries.json"])
            .expect_err("missing output should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_decode_with_format() {
        let cli = Cli::try_parse_from(["raconteur", "--format", "table", "decode", "in.rr"])
            .expect("decode args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Table)));
        assert!(matches!(cli.command, Command::Decode(_)));
    }
}
