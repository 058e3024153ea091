use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod plan;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode JSON message entries into the binary message format.
    Encode(EncodeArgs),
    /// Decode a binary message stream and print its entries.
    Decode(DecodeArgs),
    /// Show the contiguous runs of a sub-array copy.
    Plan(PlanArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Plan(args) => plan::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// JSON file holding one entry or an array of entries.
    pub input: PathBuf,
    /// Output file for the encoded messages.
    #[arg(long, short = 'o')]
    pub output: PathBuf,
    /// Maximum encoded message size in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding one or more encoded messages.
    pub input: PathBuf,
    /// Maximum accepted message size in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Source array shape (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub dims_a: Vec<u64>,
    /// Source start position (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub pos_a: Vec<u64>,
    /// Destination array shape (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub dims_b: Vec<u64>,
    /// Destination start position (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub pos_b: Vec<u64>,
    /// Extent to copy (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub count: Vec<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
