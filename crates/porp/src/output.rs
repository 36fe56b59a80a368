use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use porp_frame::{decode_metadata, AttrId, Datagram};
use porp_harness::TrialReport;

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
struct AttributeOutput {
    id: u8,
    name: &'static str,
    value: String,
}

#[derive(Serialize)]
struct DatagramOutput {
    payload_size: usize,
    payload: String,
    attributes: Vec<AttributeOutput>,
}

fn decoded_attributes(datagram: &Datagram) -> Vec<AttributeOutput> {
    decode_metadata(&datagram.metadata)
        .iter()
        .map(|(id, raw)| match AttrId::from_raw(id) {
            Some(attr) => AttributeOutput {
                id,
                name: attr.name(),
                value: attr.decode(raw).to_string(),
            },
            None => AttributeOutput {
                id,
                name: "unknown",
                value: format!("{:02x?}", raw.as_ref()),
            },
        })
        .collect()
}

pub fn print_datagram(datagram: &Datagram, format: OutputFormat) {
    let attributes = decoded_attributes(datagram);
    match format {
        OutputFormat::Json => {
            let out = DatagramOutput {
                payload_size: datagram.data.len(),
                payload: payload_preview(&datagram.data),
                attributes,
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
                .set_header(vec!["SIZE", "PAYLOAD", "ATTRIBUTES"])
                .add_row(vec![
                    datagram.data.len().to_string(),
                    payload_preview(&datagram.data),
                    attributes
                        .iter()
                        .map(|a| format!("{}={}", a.name, a.value))
                        .collect::<Vec<_>>()
                        .join(", "),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "size={} payload={}",
                datagram.data.len(),
                payload_preview(&datagram.data)
            );
            for attr in &attributes {
                println!("  {} ({}): {}", attr.name, attr.id, attr.value);
            }
        }
        OutputFormat::Raw => {
            print_raw(&datagram.data);
        }
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    label: &'a str,
    #[serde(flatten)]
    report: TrialReport,
}

/// Print per-trial reports plus the aggregate line.
pub fn print_reports(rows: &[(String, TrialReport)], total: &TrialReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<ReportRow<'_>> = rows
                .iter()
                .map(|(label, report)| ReportRow {
                    label,
                    report: *report,
                })
                .chain(std::iter::once(ReportRow {
                    label: "total",
                    report: *total,
                }))
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "TRIAL",
                    "OK",
                    "FAIL",
                    "TIMEOUT",
                    "BIT ERRORS",
                    "LEN MISMATCH",
                ]);
            for (label, report) in rows {
                table.add_row(report_row(label, report));
            }
            table.add_row(report_row("total", total));
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (label, report) in rows {
                println!("{label}: {report:?}");
            }
            println!("total: {total:?}");
        }
    }
}

fn report_row(label: &str, report: &TrialReport) -> Vec<String> {
    vec![
        label.to_string(),
        report.successes.to_string(),
        report.failures.to_string(),
        report.timeouts.to_string(),
        report.bit_errors.to_string(),
        report.length_mismatches.to_string(),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
