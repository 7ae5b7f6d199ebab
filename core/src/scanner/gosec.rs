use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::process::ToolCommand;
use super::{parse_json, RawFindings, ScannerAdapter, ToolKind};
use crate::error::ToolError;
use crate::language::Language;

#[derive(Debug, Clone, Deserialize)]
struct GosecReport {
    #[serde(rename = "Issues", default)]
    issues: Vec<GosecIssue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GosecIssue {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub cwe: Option<GosecCwe>,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub details: String,
    pub file: String,
    #[serde(default)]
    pub code: Option<String>,
    /// gosec reports lines as strings, sometimes ranges like `"12-14"`.
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GosecCwe {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl GosecIssue {
    pub fn line_number(&self) -> usize {
        leading_number(&self.line).unwrap_or(0)
    }

    pub fn column_number(&self) -> Option<usize> {
        self.column.as_deref().and_then(leading_number)
    }
}

fn leading_number(raw: &str) -> Option<usize> {
    raw.trim().split('-').next().and_then(|n| n.trim().parse().ok())
}

pub struct GosecAdapter {
    command: String,
    timeout: Duration,
}

impl GosecAdapter {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

pub fn parse_report(raw: &str) -> Result<Vec<GosecIssue>, ToolError> {
    let report: GosecReport = parse_json("gosec", raw)?;
    Ok(report.issues)
}

#[async_trait]
impl ScannerAdapter for GosecAdapter {
    fn kind(&self) -> ToolKind {
        ToolKind::Gosec
    }

    async fn run(&self, root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        let output = ToolCommand::new("gosec", &self.command)
            .args(["-fmt=json", "-quiet", "-no-fail", "./..."])
            .current_dir(root)
            .timeout(self.timeout)
            .run()
            .await?;

        let issues = match output.usable_stdout("gosec")? {
            Some(stdout) => parse_report(&stdout)?,
            None => Vec::new(),
        };
        Ok(RawFindings::Gosec(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gosec_json() {
        let raw = r#"{
          "Golang errors": {},
          "Issues": [
            {
              "severity": "MEDIUM",
              "confidence": "HIGH",
              "cwe": {"id": "22", "url": "https://cwe.mitre.org/data/definitions/22.html"},
              "rule_id": "G304",
              "details": "Potential file inclusion via variable",
              "file": "/tmp/sast_x/main.go",
              "code": "12: os.ReadFile(path)",
              "line": "12-14",
              "column": "9",
              "nosec": false
            }
          ],
          "Stats": {"files": 1, "lines": 20, "nosec": 0, "found": 1}
        }"#;
        let issues = parse_report(raw).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line_number(), 12);
        assert_eq!(issues[0].column_number(), Some(9));
        assert_eq!(issues[0].cwe.as_ref().and_then(|c| c.id.as_deref()), Some("22"));
    }

    #[test]
    fn unparsable_line_defaults_to_zero() {
        let issue = GosecIssue {
            severity: "LOW".to_string(),
            confidence: String::new(),
            cwe: None,
            rule_id: "G104".to_string(),
            details: String::new(),
            file: "main.go".to_string(),
            code: None,
            line: "?".to_string(),
            column: None,
        };
        assert_eq!(issue.line_number(), 0);
        assert_eq!(issue.column_number(), None);
    }
}
