use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use guestlink_frame::Address;
use serde::Serialize;

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
struct ReplyOutput<'a> {
    peer: &'a str,
    size: usize,
    payload: String,
    timestamp: String,
}

/// Print one chunk received from `peer`.
pub fn print_reply(data: &[u8], peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                peer,
                size: data.len(),
                payload: payload_preview(data),
                timestamp: now_unix_seconds(),
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
                .set_header(vec!["PEER", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    peer.to_string(),
                    data.len().to_string(),
                    payload_preview(data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={} size={} payload={}",
                peer,
                data.len(),
                payload_preview(data)
            );
        }
        OutputFormat::Raw => print_raw(data),
    }
}

#[derive(Serialize)]
struct KeyRow {
    kind: &'static str,
    index: u8,
    substream: &'static str,
    key: u32,
    hex: String,
}

/// Print the key table for a set of addresses.
pub fn print_keys(addresses: &[Address], format: OutputFormat) {
    let rows: Vec<KeyRow> = addresses
        .iter()
        .map(|address| KeyRow {
            kind: address.kind.name(),
            index: address.index,
            substream: address.substream.name(),
            key: address.key(),
            hex: format!("{:#06x}", address.key()),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "INDEX", "SUBSTREAM", "KEY", "HEX"]);
            for row in &rows {
                table.add_row(vec![
                    row.kind.to_string(),
                    row.index.to_string(),
                    row.substream.to_string(),
                    row.key.to_string(),
                    row.hex.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!("{}[{}].{} = {}", row.kind, row.index, row.substream, row.hex);
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{}", row.key);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
