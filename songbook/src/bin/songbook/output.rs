use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use crate::theme::{ICONS, THEME};

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that can be rendered as a table or a single compact line.
pub trait TableDisplay {
    fn to_table(&self, output: &OutputManager) -> Table;
    fn to_compact(&self) -> String;
}

/// Formats and prints everything the CLI shows to the operator.
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub fn is_json(&self) -> bool {
        self.options.output_format == OutputFormat::Json
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                println!("{}", data.to_table(self));
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    fn styled(&self, icon: &str, message: &str, color: colored::Color) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    /// Human-oriented lines are suppressed in quiet and JSON modes.
    fn chatty(&self) -> bool {
        !self.options.quiet && !self.is_json()
    }

    pub fn success(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.success, message, THEME.success));
        }
    }

    /// Errors are always shown, on stderr.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.styled(ICONS.error, message, THEME.error));
    }

    pub fn warning(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.warning, message, THEME.warning));
        }
    }

    pub fn info(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.info, message, THEME.info));
        }
    }

    /// Only shown with `--verbose`.
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.styled(ICONS.arrow, message, THEME.muted));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("\n{text}\n{}", "=".repeat(text.chars().count()))
            } else {
                format!("\n{}", text.color(THEME.primary).bold())
            };
            println!("{output}");
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("{key}: {value}")
            } else {
                format!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value))
            };
            println!("{output}");
        }
    }

    pub fn bullet(&self, text: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("  {} {text}", ICONS.bullet)
            } else {
                format!("  {} {text}", ICONS.bullet.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    pub fn indented(&self, icon: &str, text: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("  {icon} {text}")
            } else {
                format!("  {} {text}", icon.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Echo a migration log line (already indented by nesting depth).
    pub fn log_line(&self, line: &str) {
        if self.chatty() {
            let output = if self.options.no_color {
                format!("  {line}")
            } else {
                format!("  {}", line.color(THEME.muted))
            };
            println!("{output}");
        }
    }

    /// Themed table with a bold header row.
    pub fn table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }

        let header_cells: Vec<Cell> = headers
            .iter()
            .map(|h| {
                let cell = Cell::new(h).add_attribute(Attribute::Bold);
                if self.options.no_color {
                    cell
                } else {
                    cell.fg(TableColor::Cyan)
                }
            })
            .collect();
        table.set_header(header_cells);
        table
    }

    pub fn progress(&self, message: &str) {
        if !self.chatty() {
            return;
        }

        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };

        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    /// Clear the current line (useful after progress indicators)
    pub fn clear_line(&self) {
        if !self.chatty() {
            return;
        }

        print!("\r{}", " ".repeat(80));
        print!("\r");
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Dump {
        path: String,
        size: u64,
    }

    impl TableDisplay for Dump {
        fn to_table(&self, output: &OutputManager) -> Table {
            let mut table = output.table(&["Path", "Size"]);
            table.add_row(vec![Cell::new(&self.path), Cell::new(self.size.to_string())]);
            table
        }

        fn to_compact(&self) -> String {
            format!("{} ({} bytes)", self.path, self.size)
        }
    }

    fn dump() -> Dump {
        Dump {
            path: "/tmp/alice_acme-20240301-120000.pg".to_string(),
            size: 42,
        }
    }

    #[test]
    fn display_json() {
        let manager = OutputManager::new(GlobalOptions {
            output_format: OutputFormat::Json,
            ..Default::default()
        });
        assert!(manager.is_json());
        assert!(manager.display(&dump()).is_ok());
    }

    #[test]
    fn display_quiet() {
        let manager = OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        });
        assert!(manager.display(&dump()).is_ok());
    }

    #[test]
    fn table_has_header_row() {
        let manager = OutputManager::new(GlobalOptions {
            no_color: true,
            ..Default::default()
        });
        let rendered = dump().to_table(&manager).to_string();
        assert!(rendered.contains("Path"));
        assert!(rendered.contains("alice_acme-20240301-120000.pg"));
        assert_eq!(dump().to_compact(), "/tmp/alice_acme-20240301-120000.pg (42 bytes)");
    }
}
