//! Output formatting: table, json, jsonl, csv.

use serde_json::Value;

const TABLE_CELL_MAX: usize = 60;

/// Output rendering mode, resolved from config/flags by the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Jsonl,
    Csv,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "table" => Some(Self::Table),
            "json" => Some(Self::Json),
            "jsonl" => Some(Self::Jsonl),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Column spec: `(json_key, header_label)` pairs.
pub type Columns<'a> = &'a [(&'a str, &'a str)];

/// Normalise API data to a flat list of records.
///
/// Handles a bare list, the paginated `{items, total}` envelope, and a
/// single object (wrapped in a one-element list).
fn unwrap_rows(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(arr) => arr.clone(),
        Value::Object(obj) => match obj.get("items").and_then(|v| v.as_array()) {
            Some(items) => items.clone(),
            None => vec![data.clone()],
        },
        _ => Vec::new(),
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

/// Write formatted output to stdout. `quiet` suppresses output entirely.
pub fn format_output(data: &Value, columns: Option<Columns<'_>>, fmt: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match fmt {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
            );
        }
        OutputFormat::Jsonl => {
            for row in unwrap_rows(data) {
                println!("{row}");
            }
        }
        OutputFormat::Csv => print_csv(data, columns),
        OutputFormat::Table => print_table(data, columns),
    }
}

/// Column set for a row list: the explicit spec, else keys of the first row
/// with `header` applied to each auto-detected key. Tables uppercase the
/// header; CSV keeps the raw key.
fn effective_columns(
    rows: &[Value],
    columns: Option<Columns<'_>>,
    header: fn(&str) -> String,
) -> Vec<(String, String)> {
    if let Some(cols) = columns {
        return cols
            .iter()
            .map(|(k, h)| (k.to_string(), h.to_string()))
            .collect();
    }
    match rows.first() {
        Some(Value::Object(obj)) => obj.keys().map(|k| (k.clone(), header(k))).collect(),
        _ => Vec::new(),
    }
}

fn print_table(data: &Value, columns: Option<Columns<'_>>) {
    let rows = unwrap_rows(data);
    if rows.is_empty() {
        println!("No results.");
        return;
    }
    let cols = effective_columns(&rows, columns, |k| k.to_uppercase());

    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            cols.iter()
                .map(|(key, _)| truncate(&cell_text(row.get(key)), TABLE_CELL_MAX))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = cols.iter().map(|(_, h)| h.chars().count()).collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let header: Vec<String> = cols
        .iter()
        .enumerate()
        .map(|(i, (_, h))| format!("{:<width$}", h, width = widths[i]))
        .collect();
    println!("{}", header.join("  ").trim_end());

    for row in rendered {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", line.join("  ").trim_end());
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn print_csv(data: &Value, columns: Option<Columns<'_>>) {
    let rows = unwrap_rows(data);
    if rows.is_empty() {
        return;
    }
    let cols = effective_columns(&rows, columns, |k| k.to_string());

    let header: Vec<String> = cols.iter().map(|(_, h)| csv_escape(h)).collect();
    println!("{}", header.join(","));

    for row in rows {
        let line: Vec<String> = cols
            .iter()
            .map(|(key, _)| csv_escape(&cell_text(row.get(key))))
            .collect();
        println!("{}", line.join(","));
    }
}
