use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use klvlink_session::{ExtractIndex, ExtractMetadata, ReceiverStats, ScanReport, SenderStats};
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

/// Print a flat summary as a JSON object, a two-column table, aligned
/// `key: value` lines or bare values.
fn print_summary(value: &impl Serialize, rows: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, val) in rows {
                table.add_row(vec![key.to_string(), val.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
            for (key, val) in rows {
                println!("{key:>width$}: {val}");
            }
        }
        OutputFormat::Raw => {
            let line = rows
                .iter()
                .map(|(_, val)| val.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            print_raw(format!("{line}\n").as_bytes());
        }
    }
}

pub fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}

pub fn print_scan_report(path: &str, report: &ScanReport, format: OutputFormat) {
    #[derive(Serialize)]
    struct ScanOutput<'a> {
        file: &'a str,
        #[serde(flatten)]
        report: &'a ScanReport,
    }

    let rows = [
        ("file", path.to_string()),
        ("file_size", report.file_size.to_string()),
        ("key_occurrences", report.key_occurrences.to_string()),
        ("packets", report.packets.to_string()),
        ("false_positives", report.false_positives.to_string()),
        ("bytes_skipped", report.bytes_skipped.to_string()),
        ("head_hex", report.head_hex.clone()),
    ];
    print_summary(&ScanOutput { file: path, report }, &rows, format);
}

pub fn print_sender_stats(stats: &SenderStats, format: OutputFormat) {
    let rows = [
        ("sent", stats.sent.to_string()),
        ("dropped_oversize", stats.dropped_oversize.to_string()),
        ("send_errors", stats.send_errors.to_string()),
        ("bytes_sent", stats.bytes_sent.to_string()),
        ("with_telemetry", stats.with_telemetry.to_string()),
    ];
    print_summary(stats, &rows, format);
}

pub fn print_receiver_stats(stats: &ReceiverStats, format: OutputFormat) {
    let rows = [
        ("stored", stats.stored.to_string()),
        ("oversize", stats.oversize.to_string()),
        ("malformed", stats.malformed.to_string()),
        ("bad_images", stats.bad_images.to_string()),
        ("fallback_packets", stats.fallback_packets.to_string()),
        ("bytes_received", stats.bytes_received.to_string()),
    ];
    print_summary(stats, &rows, format);
}

/// Counts for an extraction run; the full index goes to the output file.
#[derive(Debug, Serialize)]
pub struct ExtractSummary<'a> {
    pub output: &'a str,
    pub packets: usize,
    pub decoded: usize,
    pub raw: usize,
}

impl<'a> ExtractSummary<'a> {
    pub fn new(output: &'a str, index: &ExtractIndex) -> Self {
        let raw = index
            .values()
            .filter(|entry| matches!(entry.metadata, ExtractMetadata::Raw { .. }))
            .count();
        Self {
            output,
            packets: index.len(),
            decoded: index.len() - raw,
            raw,
        }
    }
}

pub fn print_extract_summary(summary: &ExtractSummary<'_>, format: OutputFormat) {
    let rows = [
        ("output", summary.output.to_string()),
        ("packets", summary.packets.to_string()),
        ("decoded", summary.decoded.to_string()),
        ("raw", summary.raw.to_string()),
    ];
    print_summary(summary, &rows, format);
}
