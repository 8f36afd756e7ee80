use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use xmmlink_modem::BringUp;
use xmmlink_mux::BridgeStats;
use xmmlink_rpc::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
struct BringUpOutput<'a> {
    apn: &'a str,
    #[serde(flatten)]
    result: &'a BringUp,
    timestamp: String,
}

pub fn print_bring_up(up: &BringUp, apn: &str, format: OutputFormat) {
    let dns = up.network.dns_servers();
    match format {
        OutputFormat::Json => {
            let out = BringUpOutput {
                apn,
                result: up,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["APN", "ADDRESS", "DNS", "FCC LOCK"])
                .add_row(vec![
                    apn.to_string(),
                    up.network.address.to_string(),
                    dns.join("\n"),
                    format!("{:?}", up.unlock),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "apn={} address={} dns={} fcc={:?}",
                apn,
                up.network.address,
                dns.join(","),
                up.unlock
            );
        }
    }
}

#[derive(Serialize)]
struct ValueOutput {
    index: usize,
    kind: &'static str,
    width: Option<u8>,
    value: String,
}

#[derive(Serialize)]
struct CallOutput<'a> {
    command: u32,
    name: Option<&'a str>,
    values: Vec<ValueOutput>,
    /// Body bytes the value decoder couldn't consume.
    #[serde(skip_serializing_if = "Option::is_none")]
    undecoded: Option<String>,
}

fn value_rows(values: &[Value]) -> Vec<ValueOutput> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Int(v) => ValueOutput {
                index,
                kind: "int",
                width: None,
                value: format!("{v:#x}"),
            },
            Value::String { width, data } => ValueOutput {
                index,
                kind: "string",
                width: Some(*width),
                value: string_preview(data),
            },
        })
        .collect()
}

/// Print decoded values; `undecoded` holds the raw body when decoding failed.
pub fn print_values(
    command: u32,
    name: Option<&str>,
    values: &[Value],
    undecoded: Option<&[u8]>,
    format: OutputFormat,
) {
    let rows = value_rows(values);
    let undecoded = undecoded.map(hex);
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                command,
                name,
                values: rows,
                undecoded,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "KIND", "VALUE"]);
            for row in &rows {
                let kind = match row.width {
                    Some(width) => format!("{}/{width}", row.kind),
                    None => row.kind.to_string(),
                };
                table.add_row(vec![row.index.to_string(), kind, row.value.clone()]);
            }
            println!("{table}");
            if let Some(raw) = undecoded {
                println!("undecoded: {raw}");
            }
        }
        OutputFormat::Pretty => {
            if let Some(name) = name {
                println!("{name} ({command:#x})");
            }
            for value in values {
                println!("  {value}");
            }
            if let Some(raw) = undecoded {
                println!("  undecoded: {raw}");
            }
        }
    }
}

pub fn print_bridge_stats(stats: &BridgeStats, reason: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "reason": reason,
                "packets_up": stats.packets_up,
                "bytes_up": stats.bytes_up,
                "packets_down": stats.packets_down,
                "bytes_down": stats.bytes_down,
                "dropped": stats.dropped,
            });
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["DIRECTION", "PACKETS", "BYTES"])
                .add_row(vec![
                    "uplink".to_string(),
                    stats.packets_up.to_string(),
                    stats.bytes_up.to_string(),
                ])
                .add_row(vec![
                    "downlink".to_string(),
                    stats.packets_down.to_string(),
                    stats.bytes_down.to_string(),
                ]);
            println!("{table}");
            println!("dropped={} reason={reason}", stats.dropped);
        }
        OutputFormat::Pretty => {
            println!(
                "up={}/{}B down={}/{}B dropped={} reason={reason}",
                stats.packets_up, stats.bytes_up, stats.packets_down, stats.bytes_down, stats.dropped
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Printable text when the string is ASCII (trailing NULs trimmed), hex otherwise.
fn string_preview(data: &[u8]) -> String {
    let trimmed = match data.iter().rposition(|&b| b != 0) {
        Some(end) => &data[..=end],
        None => &data[..0],
    };
    if !trimmed.is_empty() && trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        String::from_utf8_lossy(trimmed).into_owned()
    } else {
        hex(data)
    }
}

pub fn hex(data: &[u8]) -> String {
    hex::encode(data)
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
