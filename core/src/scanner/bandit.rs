use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::process::ToolCommand;
use super::{parse_json, RawFindings, ScannerAdapter, ToolKind};
use crate::error::ToolError;
use crate::language::Language;

/// Rules disabled by default. B101 flags every `assert`.
const SKIPPED_TESTS: &str = "B101";

#[derive(Debug, Clone, Deserialize)]
struct BanditReport {
    #[serde(default)]
    results: Vec<BanditIssue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BanditIssue {
    pub filename: String,
    #[serde(default)]
    pub line_number: usize,
    #[serde(default)]
    pub col_offset: Option<usize>,
    #[serde(default)]
    pub issue_severity: String,
    #[serde(default)]
    pub issue_confidence: String,
    #[serde(default)]
    pub issue_text: String,
    #[serde(default)]
    pub test_id: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub issue_cwe: Option<BanditCwe>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BanditCwe {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub link: Option<String>,
}

pub struct BanditAdapter {
    command: String,
    timeout: Duration,
}

impl BanditAdapter {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

pub fn parse_report(raw: &str) -> Result<Vec<BanditIssue>, ToolError> {
    let report: BanditReport = parse_json("bandit", raw)?;
    Ok(report.results)
}

#[async_trait]
impl ScannerAdapter for BanditAdapter {
    fn kind(&self) -> ToolKind {
        ToolKind::Bandit
    }

    async fn run(&self, root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        let output = ToolCommand::new("bandit", &self.command)
            .arg("-r")
            .arg(root.as_os_str())
            .args(["-f", "json", "-q", "--skip", SKIPPED_TESTS])
            .timeout(self.timeout)
            .run()
            .await?;

        let issues = match output.usable_stdout("bandit")? {
            Some(stdout) => parse_report(&stdout)?,
            None => Vec::new(),
        };
        Ok(RawFindings::Bandit(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "errors": [],
      "generated_at": "2024-05-01T10:00:00Z",
      "metrics": {},
      "results": [
        {
          "code": "4 user = input()\n5 eval(user)\n",
          "col_offset": 0,
          "filename": "/tmp/sast_x/app.py",
          "issue_confidence": "HIGH",
          "issue_cwe": {"id": 78, "link": "https://cwe.mitre.org/data/definitions/78.html"},
          "issue_severity": "MEDIUM",
          "issue_text": "Use of possibly insecure function - consider using safer ast.literal_eval.",
          "line_number": 5,
          "line_range": [5],
          "more_info": "https://bandit.readthedocs.io/",
          "test_id": "B307",
          "test_name": "blacklist"
        }
      ]
    }"#;

    #[test]
    fn parses_bandit_json() {
        let issues = parse_report(SAMPLE).unwrap();
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.test_id, "B307");
        assert_eq!(issue.line_number, 5);
        assert_eq!(issue.issue_severity, "MEDIUM");
        assert_eq!(issue.issue_cwe.as_ref().and_then(|c| c.id), Some(78));
    }

    #[test]
    fn missing_results_key_means_no_issues() {
        assert!(parse_report(r#"{"errors": []}"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_malformed_output() {
        assert!(matches!(
            parse_report("Traceback (most recent call last):"),
            Err(ToolError::MalformedOutput { .. })
        ));
    }
}
