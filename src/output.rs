//! Output formatting for the CLI subcommands
//!
//! JSON and YAML for scripts, tables for people. `auto` picks a table on a
//! terminal and compact JSON when piped.

use std::io::IsTerminal;

use anyhow::Result;
use serde::Serialize;
use tabled::settings::object::Rows;
use tabled::settings::{Remove, Style};
use tabled::{Table, Tabled};

use crate::cli::OutputFormat;
use crate::config::RuntimeContext;

/// Print serializable data in the configured format
pub fn print_output<T: Serialize>(ctx: &RuntimeContext, data: &T) -> Result<()> {
    let output = format_output(ctx.output_format(), std::io::stdout().is_terminal(), data)?;
    println!("{output}");
    Ok(())
}

/// Render data for a format; tables are not available for arbitrary data
/// and fall back to pretty JSON
pub fn format_output<T: Serialize>(format: OutputFormat, is_tty: bool, data: &T) -> Result<String> {
    Ok(match format {
        OutputFormat::Json if is_tty => serde_json::to_string_pretty(data)?,
        OutputFormat::Json => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
        OutputFormat::Auto if !is_tty => serde_json::to_string(data)?,
        OutputFormat::Table | OutputFormat::Auto => serde_json::to_string_pretty(data)?,
    })
}

/// Print rows as a table, or as a serialized list for JSON and YAML
pub fn print_table<T: Tabled + Serialize>(ctx: &RuntimeContext, items: &[T]) -> Result<()> {
    let format = ctx.output_format();
    let is_tty = std::io::stdout().is_terminal();

    let output = match format {
        OutputFormat::Table => table_string(items, no_headers(ctx)),
        OutputFormat::Auto if is_tty => table_string(items, no_headers(ctx)),
        _ => format_output(format, is_tty, &items)?,
    };
    println!("{output}");
    Ok(())
}

fn no_headers(ctx: &RuntimeContext) -> bool {
    ctx.global.no_headers || ctx.config.output.no_headers
}

fn table_string<T: Tabled>(items: &[T], no_headers: bool) -> String {
    let mut table = Table::new(items);
    table.with(Style::sharp());
    if no_headers {
        table.with(Remove::row(Rows::first()));
    }
    table.to_string()
}
