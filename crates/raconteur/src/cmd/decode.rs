use std::fs::File;
use std::io::BufReader;

use raconteur_value::{CodecConfig, MessageReader};
use tracing::debug;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, value_error, CliResult, SUCCESS};
use crate::output::{print_entries, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.input)
        .map_err(|e| io_error(&format!("failed to open {}", args.input.display()), e))?;

    let mut config = CodecConfig::default();
    if let Some(max) = args.max_message_size {
        config.max_message_size = max;
    }

    let mut reader = MessageReader::with_config(BufReader::new(file), config);
    let entries = reader
        .read_all()
        .map_err(|e| value_error("failed to decode messages", e))?;
    debug!(entries = entries.len(), input = %args.input.display(), "decoded entries");

    print_entries(&entries, format);
    Ok(SUCCESS)
}
