use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::process::ToolCommand;
use super::{parse_json, RawFindings, ScannerAdapter, ToolKind};
use crate::error::ToolError;
use crate::language::Language;

#[derive(Debug, Clone, Deserialize)]
struct SemgrepReport {
    #[serde(default)]
    results: Vec<SemgrepResult>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SemgrepResult {
    pub check_id: String,
    pub path: String,
    pub start: SemgrepPosition,
    #[serde(default)]
    pub end: Option<SemgrepPosition>,
    #[serde(default)]
    pub extra: SemgrepExtra,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SemgrepPosition {
    pub line: usize,
    #[serde(default)]
    pub col: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SemgrepExtra {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub lines: Option<String>,
    #[serde(default)]
    pub metadata: SemgrepMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SemgrepMetadata {
    #[serde(default)]
    pub cwe: Option<OneOrMany>,
    #[serde(default)]
    pub owasp: Option<OneOrMany>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Rule metadata fields appear both as a string and as a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        let value = match self {
            OneOrMany::One(s) => Some(s.as_str()),
            OneOrMany::Many(v) => v.first().map(String::as_str),
        };
        value.filter(|s| !s.trim().is_empty())
    }
}

/// Registry ruleset for languages without a dedicated pack.
pub const GENERAL_RULESET: &str = "p/owasp-top-ten";

/// Registry ruleset used for a language.
pub fn ruleset_for(language: Language) -> &'static str {
    match language {
        Language::Python => "p/python",
        Language::Javascript | Language::Typescript => "p/javascript",
        Language::Java => "p/java",
        Language::Go => "p/golang",
        Language::Php | Language::C | Language::Cpp => GENERAL_RULESET,
    }
}

pub struct SemgrepAdapter {
    command: String,
    timeout: Duration,
}

impl SemgrepAdapter {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

pub fn parse_report(raw: &str) -> Result<Vec<SemgrepResult>, ToolError> {
    let report: SemgrepReport = parse_json("semgrep", raw)?;
    if !report.errors.is_empty() {
        tracing::debug!("semgrep reported {} non-fatal errors", report.errors.len());
    }
    Ok(report.results)
}

#[async_trait]
impl ScannerAdapter for SemgrepAdapter {
    fn kind(&self) -> ToolKind {
        ToolKind::Semgrep
    }

    async fn run(&self, root: &Path, language: Language) -> Result<RawFindings, ToolError> {
        let output = ToolCommand::new("semgrep", &self.command)
            .args(["--config", ruleset_for(language), "--json", "--quiet", "--metrics=off"])
            .arg("--timeout")
            .arg(self.timeout.as_secs().to_string())
            .arg(root.as_os_str())
            .current_dir(root)
            .timeout(self.timeout)
            .run()
            .await?;

        let results = match output.usable_stdout("semgrep")? {
            Some(stdout) => parse_report(&stdout)?,
            None => Vec::new(),
        };
        Ok(RawFindings::Semgrep(results))
    }
}
