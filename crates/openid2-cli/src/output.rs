use colored::Colorize;
use serde::Serialize;

use crate::cli::OutputFormat;

/// Prints a serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => print_error(&format!("failed to serialize output: {e}")),
    }
}

/// Prints `label: value` pairs in text mode, or a JSON object otherwise.
pub fn print_fields(fields: &[(&str, Option<&str>)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let object: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| {
                    let value = v.map_or(serde_json::Value::Null, |v| v.into());
                    ((*k).to_string(), value)
                })
                .collect();
            print_json(&object);
        }
        OutputFormat::Text => {
            let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (k, v) in fields {
                println!(
                    "{}: {}",
                    format!("{k:width$}").cyan(),
                    v.unwrap_or("(not provided)")
                );
            }
        }
    }
}

pub fn print_success(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
