use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use uartmux_frame::{Decoded, Frame, Malformed};
use uartmux_mux::StatsSnapshot;

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

/// One decode outcome, flattened for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeRecord {
    pub kind: &'static str,
    pub address: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub raw: Option<Vec<u8>>,
}

impl DecodeRecord {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            kind: "frame",
            address: frame.address,
            length: Some(frame.payload.len()),
            checksum: Some(frame.checksum()),
            payload: Some(payload_preview(frame.payload.as_ref())),
            error: None,
            raw: Some(frame.payload.to_vec()),
        }
    }

    pub fn from_malformed(malformed: &Malformed) -> Self {
        Self {
            kind: "malformed",
            address: malformed.address(),
            length: None,
            checksum: None,
            payload: None,
            error: Some(malformed.to_string()),
            raw: None,
        }
    }

    /// `None` for [`Decoded::Incomplete`].
    pub fn from_decoded(decoded: &Decoded) -> Option<Self> {
        match decoded {
            Decoded::Frame(frame) => Some(Self::from_frame(frame)),
            Decoded::Invalid(malformed) => Some(Self::from_malformed(malformed)),
            Decoded::Incomplete => None,
        }
    }
}

/// Totals for a decoded capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub frames: u64,
    pub malformed: u64,
    pub discarded: u64,
    /// The capture ended partway through a frame.
    pub incomplete: bool,
}

pub fn print_records(records: &[DecodeRecord], summary: &DecodeSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct SummaryRecord<'a> {
                kind: &'static str,
                #[serde(flatten)]
                summary: &'a DecodeSummary,
            }

            for record in records {
                print_json(record);
            }
            print_json(&SummaryRecord {
                kind: "summary",
                summary,
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "ADDRESS", "SIZE", "CRC", "PAYLOAD / ERROR"]);
            for record in records {
                table.add_row(vec![
                    record.kind.to_string(),
                    record.address.to_string(),
                    record.length.map(|n| n.to_string()).unwrap_or_default(),
                    record
                        .checksum
                        .map(|c| format!("{c:#04x}"))
                        .unwrap_or_default(),
                    record
                        .payload
                        .clone()
                        .or_else(|| record.error.clone())
                        .unwrap_or_default(),
                ]);
            }
            println!("{table}");
            println!("{}", summary_line(summary));
        }
        OutputFormat::Pretty => {
            for record in records {
                match (&record.payload, &record.error) {
                    (Some(payload), _) => println!(
                        "frame address={} size={} crc={:#04x} payload={}",
                        record.address,
                        record.length.unwrap_or_default(),
                        record.checksum.unwrap_or_default(),
                        payload
                    ),
                    (None, Some(error)) => {
                        println!("malformed address={} error={}", record.address, error)
                    }
                    (None, None) => {}
                }
            }
            println!("{}", summary_line(summary));
        }
        OutputFormat::Raw => {
            for record in records {
                if let Some(raw) = &record.raw {
                    print_raw(raw);
                }
            }
        }
    }
}

fn summary_line(summary: &DecodeSummary) -> String {
    format!(
        "frames={} malformed={} discarded={} incomplete={}",
        summary.frames, summary.malformed, summary.discarded, summary.incomplete
    )
}

pub fn print_stats(stats: &StatsSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in stats_rows(stats) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line: Vec<String> = stats_rows(stats)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

fn stats_rows(stats: &StatsSnapshot) -> [(&'static str, u64); 9] {
    [
        ("frames_in", stats.frames_in),
        ("bytes_in", stats.bytes_in),
        ("frames_out", stats.frames_out),
        ("bytes_out", stats.bytes_out),
        ("malformed", stats.malformed),
        ("unroutable", stats.unroutable),
        ("stream_faults", stats.stream_faults),
        ("truncated", stats.truncated),
        ("discarded", stats.discarded),
    ]
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
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
