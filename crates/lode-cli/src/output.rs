//! Output rendering: JSON for machines, aligned fields for humans.
//!
//! The human renderer works from the serialized structure, so any
//! record shape prints as data rather than a type name.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Human,
}

/// Print a value in the requested format.
pub fn print<T: Serialize>(value: &T, format: Format) -> anyhow::Result<()> {
    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Format::Human => {
            let value = serde_json::to_value(value)?;
            print_human(&value, 0);
        }
    }
    Ok(())
}

fn print_human(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{pad}{key}:");
                        print_human(child, indent + 1);
                    }
                    _ => println!("{pad}{key}: {}", scalar(child)),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{pad}-");
                        print_human(item, indent + 1);
                    }
                    _ => println!("{pad}- {}", scalar(item)),
                }
            }
        }
        scalar_value => println!("{pad}{}", scalar(scalar_value)),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
