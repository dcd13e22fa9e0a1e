//! Alert export to CSV, JSON and a bare-bones PDF report.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::error::AlertError;
use crate::types::Alert;

const CSV_HEADER: [&str; 12] = [
    "id",
    "title",
    "description",
    "type",
    "severity",
    "status",
    "source",
    "device_id",
    "location",
    "timestamp",
    "acknowledged_by",
    "resolved_by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Pdf,
}

impl FromStr for ExportFormat {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(AlertError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// Rendered export ready to be served as a download
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub content_type: &'static str,
    pub filename: String,
    pub body: Vec<u8>,
}

pub fn export(alerts: &[Alert], format: ExportFormat) -> Result<ExportDocument> {
    let body = match format {
        ExportFormat::Csv => to_csv(alerts).into_bytes(),
        ExportFormat::Json => serde_json::to_vec_pretty(alerts)?,
        ExportFormat::Pdf => to_pdf(alerts),
    };
    Ok(ExportDocument {
        content_type: format.content_type(),
        filename: format!("alerts-{}.{}", Utc::now().format("%Y%m%d-%H%M%S"), format.extension()),
        body,
    })
}

/// Quote a field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(alerts: &[Alert]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");
    for alert in alerts {
        let row = [
            alert.id.to_string(),
            alert.title.clone(),
            alert.description.clone(),
            alert.alert_type.to_string(),
            alert.severity.to_string(),
            alert.status.to_string(),
            alert.source.to_string(),
            alert.device_id.clone().unwrap_or_default(),
            alert.location.clone().unwrap_or_default(),
            alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            alert.acknowledged_by.clone().unwrap_or_default(),
            alert.resolved_by.clone().unwrap_or_default(),
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Escape a PDF literal string, dropping anything outside printable ASCII
fn pdf_text(value: &str) -> String {
    value
        .chars()
        .filter_map(|c| match c {
            '(' | ')' | '\\' => Some(format!("\\{}", c)),
            ' '..='~' => Some(c.to_string()),
            _ => None,
        })
        .collect()
}

fn report_lines(alerts: &[Alert]) -> Vec<String> {
    let mut lines = vec![
        "Microgrid Alert Report".to_string(),
        format!("Generated {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        format!("{} alert(s)", alerts.len()),
        String::new(),
    ];
    for alert in alerts {
        lines.push(format!(
            "[{}] {} - {} ({})",
            alert.severity, alert.title, alert.status, alert.timestamp.format("%Y-%m-%d %H:%M")
        ));
        let mut detail: String = alert.description.chars().take(90).collect();
        if let Some(device) = &alert.device_id {
            let _ = write!(detail, " device={}", device);
        }
        lines.push(format!("    {}", detail));
    }
    lines
}

/// Single-page PDF 1.4 with one Helvetica text stream. Lines past the page
/// bottom are cut off.
pub fn to_pdf(alerts: &[Alert]) -> Vec<u8> {
    let mut stream = String::from("BT\n/F1 10 Tf\n14 TL\n50 800 Td\n");
    for line in report_lines(alerts).iter().take(55) {
        let _ = writeln!(stream, "({}) Tj T*", pdf_text(line));
    }
    stream.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
         /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", stream.len(), stream),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        let _ = write!(pdf, "{} 0 obj\n{}\nendobj\n", i + 1, body);
    }

    let xref_start = pdf.len();
    let _ = write!(pdf, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(pdf, "{:010} 00000 n \n", offset);
    }
    let _ = write!(
        pdf,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_start
    );
    pdf.into_bytes()
}
