//! Renders a terminal job into a downloadable payload.

use chrono::Utc;
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::aggregate::summarize;
use crate::error::{CoreError, Result, ValidationError};
use crate::language::DetectionReport;
use crate::model::JobView;

const CSV_HEADER: [&str; 6] = ["file", "line", "severity", "rule", "message", "category"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Pdf,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            "pdf" => Ok(ReportFormat::Pdf),
            other => Err(ValidationError::UnsupportedFormat(format!(
                "report format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub content_type: &'static str,
    pub filename: String,
    pub body: Vec<u8>,
}

/// Only terminal jobs are exportable. A failed job with no findings
/// renders as an empty, well-formed report.
pub fn export(view: &JobView, format: ReportFormat) -> Result<RenderedReport> {
    let job = &view.job;
    if !job.state.is_terminal() {
        return Err(CoreError::JobNotReady {
            job_id: job.id,
            state: job.state,
        });
    }

    let body = match format {
        ReportFormat::Json => render_json(view)?,
        ReportFormat::Csv => render_csv(view).into_bytes(),
        ReportFormat::Pdf => return Err(CoreError::NotImplemented("PDF export".to_string())),
    };

    Ok(RenderedReport {
        content_type: format.content_type(),
        filename: format!("sast_report_{}.{}", job.id, format.as_str()),
        body,
    })
}

fn render_json(view: &JobView) -> Result<Vec<u8>> {
    let job = &view.job;
    let summary = job
        .summary
        .clone()
        .unwrap_or_else(|| summarize(&view.findings, &DetectionReport::default()));

    let document = json!({
        "scan_id": job.id,
        "source": job.source.label(),
        "state": job.state,
        "language": job.effective_language.or(job.language_hint),
        "created_at": job.created_at,
        "completed_at": job.completed_at,
        "error": job.error,
        "generated_at": Utc::now(),
        "summary": summary,
        "findings": view.findings,
    });
    serde_json::to_vec_pretty(&document)
        .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

fn render_csv(view: &JobView) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push('\n');

    for finding in &view.findings {
        let message = if finding.description.trim().is_empty() {
            finding.title.as_str()
        } else {
            finding.description.as_str()
        };
        let row = [
            escape_csv_value(&finding.file_path),
            finding.line.to_string(),
            finding.severity.as_str().to_uppercase(),
            escape_csv_value(&finding.rule_id),
            escape_csv_value(message),
            escape_csv_value(finding.category.as_deref().unwrap_or("")),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn escape_csv_value(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
