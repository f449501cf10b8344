use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
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

/// One line of command output describing a message.
#[derive(Serialize, Debug)]
pub struct MessageRecord {
    /// `sent`, `scheduled`, `delivered` or `relayed`.
    pub event: &'static str,
    pub group: u8,
    pub id: u8,
    pub size: usize,
    /// Subscriber slot for `delivered`, client number for `relayed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    pub payload: String,
    pub timestamp: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl MessageRecord {
    pub fn new(event: &'static str, group: u8, id: u8, payload: &[u8]) -> Self {
        Self {
            event,
            group,
            id,
            size: payload.len(),
            source: None,
            delay_ms: None,
            payload: payload_preview(payload),
            timestamp: now_unix_seconds(),
            raw: payload.to_vec(),
        }
    }

    pub fn with_source(mut self, source: u64) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

pub fn print_message(record: &MessageRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "GROUP", "ID", "SIZE", "SOURCE", "PAYLOAD"])
                .add_row(vec![
                    record.event.to_string(),
                    format!("{:#04x}", record.group),
                    format!("{:#04x}", record.id),
                    record.size.to_string(),
                    record
                        .source
                        .map(|source| source.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Raw => print_raw(&record.raw),
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
