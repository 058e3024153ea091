use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use raconteur_value::{CopyRun, ElementData, MessageEntry};
use serde::Serialize;

const ENTRIES_SCHEMA: &str = "https://schemas.raconteur.dev/cli/v1/entries.schema.json";
const PLAN_SCHEMA: &str = "https://schemas.raconteur.dev/cli/v1/copy-plan.schema.json";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EntriesOutput<'a> {
    schema_id: &'a str,
    count: usize,
    entries: &'a [MessageEntry],
}

pub fn print_entries(entries: &[MessageEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EntriesOutput {
                schema_id: ENTRIES_SCHEMA,
                count: entries.len(),
                entries,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Raw => {
            for entry in entries {
                println!(
                    "{}",
                    serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "MEMBER", "REQUEST", "ELEMENTS", "ERROR"]);
            for entry in entries {
                table.add_row(vec![
                    entry_type_name(entry),
                    entry.member_name.clone(),
                    entry.request_id.to_string(),
                    element_summary(entry),
                    entry
                        .error
                        .as_ref()
                        .map(|e| e.name.clone())
                        .unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in entries {
                println!(
                    "{} member={} request={}",
                    entry_type_name(entry),
                    entry.member_name,
                    entry.request_id
                );
                if let Some(error) = &entry.error {
                    println!("  error: {} ({}): {}", error.name, error.code, error.message);
                }
                for element in &entry.elements {
                    println!("  {} = {}", element.name, data_preview(&element.data));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    schema_id: &'a str,
    element_count: usize,
    run_len: usize,
    runs: &'a [RunOutput],
}

#[derive(Serialize)]
struct RunOutput {
    offset_a: usize,
    offset_b: usize,
    len: usize,
}

pub fn print_plan(runs: &[CopyRun], element_count: usize, run_len: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let runs: Vec<RunOutput> = runs
                .iter()
                .map(|r| RunOutput {
                    offset_a: r.offset_a,
                    offset_b: r.offset_b,
                    len: r.len,
                })
                .collect();
            let out = PlanOutput {
                schema_id: PLAN_SCHEMA,
                element_count,
                run_len,
                runs: &runs,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["RUN", "SOURCE", "DESTINATION", "LENGTH"]);
            for (i, run) in runs.iter().enumerate() {
                table.add_row(vec![
                    i.to_string(),
                    run.offset_a.to_string(),
                    run.offset_b.to_string(),
                    run.len.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} elements in {} runs of {}",
                element_count,
                runs.len(),
                run_len
            );
            for run in runs {
                println!("  a[{}..] -> b[{}..] x{}", run.offset_a, run.offset_b, run.len);
            }
        }
    }
}

fn entry_type_name(entry: &MessageEntry) -> String {
    serde_json::to_value(entry.entry_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", entry.entry_type))
}

fn element_summary(entry: &MessageEntry) -> String {
    entry
        .elements
        .iter()
        .map(|e| format!("{}:{}", e.name, e.data.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn data_preview(data: &ElementData) -> String {
    match data {
        ElementData::Void => "void".to_string(),
        ElementData::String(text) => format!("{text:?}"),
        ElementData::Numeric(values) => {
            format!("{}[{}]", values.data_type(), values.len())
        }
        ElementData::List(list) => format!(
            "{} {} ({} elements)",
            data.data_type(),
            list.type_name,
            list.elements.len()
        ),
    }
}
