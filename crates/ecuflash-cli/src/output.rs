//! Output formatting for ecuflash (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use ecuflash_core::{Chunk, ChunkOutcome, TransferReport};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode or machine-readable output)
    pub fn success(&self, msg: &str) {
        if !self.quiet && self.format == OutputFormat::Table {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode or machine-readable output)
    pub fn info(&self, msg: &str) {
        if !self.quiet && self.format == OutputFormat::Table {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print a transfer report
    ///
    /// Tables show the summary and only the chunks that needed attention;
    /// JSON carries the full report.
    pub fn print_report(&self, report: &TransferReport) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let rows: Vec<OutcomeRow> = report.outcomes.iter().map(OutcomeRow::from).collect();
                print_csv(&rows);
            }
            OutputFormat::Table => {
                let pairs = [
                    ("Session", report.session_id.to_string()),
                    ("Started", report.started_at.to_rfc3339()),
                    ("State", report.final_state.to_string()),
                    ("Image", format!("{} bytes", report.image_len)),
                    (
                        "Chunks",
                        format!("{}/{} ok", report.succeeded, report.total_chunks),
                    ),
                    ("Retries", report.retries.to_string()),
                    ("Substituted", report.substituted.to_string()),
                    ("Skipped", report.skipped.to_string()),
                    ("Elapsed", format!("{:.2?}", report.elapsed)),
                ];
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }

                let notable: Vec<OutcomeRow> = report
                    .outcomes
                    .iter()
                    .filter(|o| !o.result.is_ok() || o.attempts > 1)
                    .map(OutcomeRow::from)
                    .collect();
                if !notable.is_empty() {
                    println!("{}", Table::new(&notable));
                }
            }
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    let Some(first) = data.first() else {
        return;
    };

    // Get field names from the first item
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(first) {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types
// =============================================================================

/// Chunk display for inspect command
#[derive(Debug, Tabled, Serialize)]
pub struct ChunkRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Len")]
    pub len: usize,
    #[tabled(rename = "Bytes")]
    pub bytes: String,
    #[tabled(rename = "Transmitted")]
    pub transmitted: String,
    #[tabled(rename = "Final")]
    pub is_final: bool,
}

impl From<&Chunk<'_>> for ChunkRow {
    fn from(chunk: &Chunk<'_>) -> Self {
        let transmitted = match (chunk.sentinel, chunk.payload()) {
            (_, None) => "skipped".to_string(),
            (Some(_), Some(payload)) => format!("{} (substituted)", hex::encode_upper(payload)),
            (None, Some(payload)) => hex::encode_upper(payload),
        };
        Self {
            index: chunk.sequence_index,
            len: chunk.data_len(),
            bytes: hex::encode_upper(chunk.bytes()),
            transmitted,
            is_final: chunk.is_final,
        }
    }
}

/// Chunk outcome display for flash reports
#[derive(Debug, Tabled, Serialize)]
pub struct OutcomeRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Attempts")]
    pub attempts: u32,
    #[tabled(rename = "Sentinel")]
    pub sentinel: String,
}

impl From<&ChunkOutcome> for OutcomeRow {
    fn from(outcome: &ChunkOutcome) -> Self {
        Self {
            index: outcome.sequence_index,
            result: format!("{:?}", outcome.result),
            attempts: outcome.attempts,
            sentinel: outcome
                .sentinel
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}
