use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::process::ToolCommand;
use super::{parse_json, RawFindings, ScannerAdapter, ToolKind};
use crate::error::ToolError;
use crate::language::Language;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EslintFileResult {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(default)]
    pub messages: Vec<EslintMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EslintMessage {
    /// Absent for parser errors.
    #[serde(rename = "ruleId", default)]
    pub rule_id: Option<String>,
    /// 1 = warning, 2 = error.
    #[serde(default)]
    pub severity: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub column: Option<usize>,
}

pub struct EslintAdapter {
    command: String,
    timeout: Duration,
}

impl EslintAdapter {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

pub fn parse_report(raw: &str) -> Result<Vec<EslintFileResult>, ToolError> {
    parse_json("eslint", raw)
}

#[async_trait]
impl ScannerAdapter for EslintAdapter {
    fn kind(&self) -> ToolKind {
        ToolKind::Eslint
    }

    async fn run(&self, root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        let output = ToolCommand::new("eslint", &self.command)
            .arg(root.as_os_str())
            .args([
                "--format",
                "json",
                "--ext",
                ".js,.jsx,.ts,.tsx",
                "--no-error-on-unmatched-pattern",
            ])
            .current_dir(root)
            .timeout(self.timeout)
            .run()
            .await?;

        let files = match output.usable_stdout("eslint")? {
            Some(stdout) => parse_report(&stdout)?,
            None => Vec::new(),
        };
        Ok(RawFindings::Eslint(files))
    }
}
