use std::fs::File;
use std::io::BufWriter;

use raconteur_value::{CodecConfig, MessageEntry, MessageWriter};
use serde::Deserialize;
use tracing::info;

use crate::cmd::EncodeArgs;
use crate::exit::{io_error, json_error, value_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Deserialize)]
#[serde(untagged)]
enum EntryInput {
    One(Box<MessageEntry>),
    Many(Vec<MessageEntry>),
}

impl EntryInput {
    fn into_entries(self) -> Vec<MessageEntry> {
        match self {
            EntryInput::One(entry) => vec![*entry],
            EntryInput::Many(entries) => entries,
        }
    }
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let text = std::fs::read_to_string(&args.input)
        .map_err(|e| io_error(&format!("failed to read {}", args.input.display()), e))?;
    let entries = serde_json::from_str::<EntryInput>(&text)
        .map_err(|e| json_error("invalid entry JSON", e))?
        .into_entries();

    let mut config = CodecConfig::default();
    if let Some(max) = args.max_message_size {
        config.max_message_size = max;
    }

    let file = File::create(&args.output)
        .map_err(|e| io_error(&format!("failed to create {}", args.output.display()), e))?;
    let mut writer = MessageWriter::with_config(BufWriter::new(file), config);
    for entry in &entries {
        writer
            .write_message(entry)
            .map_err(|e| value_error("failed to encode entry", e))?;
    }
    writer
        .flush()
        .map_err(|e| value_error("failed to flush output", e))?;

    info!(
        entries = entries.len(),
        output = %args.output.display(),
        "encoded entries"
    );

    if matches!(format, OutputFormat::Pretty | OutputFormat::Table) {
        println!(
            "encoded {} entries to {}",
            entries.len(),
            args.output.display()
        );
    }

    Ok(SUCCESS)
}
