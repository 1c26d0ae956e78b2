//! Output formatting for vdiag (table, json, csv)

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use vdiag_core::DangerLevel;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Where and how results are rendered
///
/// Results go to stdout; warnings and errors go to stderr so piped JSON or
/// CSV stays parseable.
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

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red().bold());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, rows: &[T]) {
        match self.format {
            OutputFormat::Table if rows.is_empty() => self.info("(none)"),
            OutputFormat::Table => {
                let mut table = Table::new(rows);
                table.with(Style::sharp());
                println!("{}", table);
            }
            OutputFormat::Json => self.print_json(&rows),
            OutputFormat::Csv => {
                println!("{}", csv_line(T::headers()));
                for row in rows {
                    println!("{}", csv_line(row.fields()));
                }
            }
        }
    }

    /// Print a structured value as pretty JSON regardless of format
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => self.error(&format!("Failed to render JSON: {}", e)),
        }
    }

    /// Print labelled values, one per line in table mode
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                for (key, value) in pairs {
                    println!("{:>width$}  {}", key.bold(), value, width = width);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), serde_json::Value::String(v.clone())))
                    .collect();
                self.print_json(&map);
            }
            OutputFormat::Csv => {
                println!("{}", csv_line(pairs.iter().map(|(k, _)| Cow::Borrowed(*k))));
                println!("{}", csv_line(pairs.iter().map(|(_, v)| Cow::Borrowed(v.as_str()))));
            }
        }
    }
}

/// Tier label colored by severity
pub fn tier_label(level: DangerLevel) -> ColoredString {
    let label = level.to_string();
    match level {
        DangerLevel::Safe => label.green(),
        DangerLevel::Caution => label.yellow(),
        DangerLevel::Warning => label.truecolor(255, 140, 0).bold(),
        DangerLevel::Danger => label.red().bold(),
    }
}

fn csv_line<'a, I>(cells: I) -> String
where
    I: IntoIterator<Item = Cow<'a, str>>,
{
    cells
        .into_iter()
        .map(|cell| csv_cell(&cell).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_cell(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

// =============================================================================
// Row types
// =============================================================================

/// `check`: one declared module
#[derive(Debug, Tabled, Serialize)]
pub struct ModuleRow {
    #[tabled(rename = "Module")]
    pub name: String,
    #[tabled(rename = "Address")]
    pub address: String,
    #[tabled(rename = "Protocol")]
    pub protocol: String,
    #[tabled(rename = "Bus")]
    pub bus: String,
}

/// `check`: one command with its tier
#[derive(Debug, Tabled, Serialize)]
pub struct CommandRow {
    #[tabled(rename = "Command")]
    pub id: String,
    #[tabled(rename = "Request")]
    pub request: String,
    #[tabled(rename = "Pattern")]
    pub pattern: String,
    #[tabled(rename = "Tier")]
    pub tier: String,
    #[tabled(rename = "Reason")]
    pub reason: String,
}

/// `classify`: one confirmation step
#[derive(Debug, Tabled, Serialize)]
pub struct StepRow {
    #[tabled(rename = "#")]
    pub number: usize,
    #[tabled(rename = "Prompt")]
    pub prompt: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct DtcRow {
    #[tabled(rename = "Code")]
    pub code: String,
    #[tabled(rename = "Raw")]
    pub raw: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Known")]
    pub known: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Raw")]
    pub raw: String,
}

#[derive(Debug, Tabled, Serialize)]
pub struct FlagRow {
    #[tabled(rename = "Flag")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csv_cells_are_quoted_only_when_needed() {
        assert_eq!(csv_cell("7A0"), "7A0");
        assert_eq!(csv_cell("I UNDERSTAND, GO"), "\"I UNDERSTAND, GO\"");
        assert_eq!(csv_cell("say \"yes\""), "\"say \"\"yes\"\"\"");
    }

    #[test]
    fn test_csv_header_follows_row_type() {
        assert_eq!(csv_line(ModuleRow::headers()), "Module,Address,Protocol,Bus");
        let row = StepRow {
            number: 2,
            prompt: "Type EXECUTE ABS.BLEED, then Enter".to_string(),
        };
        assert_eq!(csv_line(row.fields()), "2,\"Type EXECUTE ABS.BLEED, then Enter\"");
    }
}
