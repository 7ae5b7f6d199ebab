// Scanner module - 扫描器模块
// 定义扫描器适配器的核心接口和类型

pub mod bandit;
pub mod dispatcher;
pub mod eslint;
pub mod gosec;
pub mod patterns;
pub mod process;
pub mod semgrep;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ToolError;
use crate::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Bandit,
    Semgrep,
    Eslint,
    Gosec,
    /// Built-in regex rules, runs in-process.
    Patterns,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Bandit,
        ToolKind::Semgrep,
        ToolKind::Eslint,
        ToolKind::Gosec,
        ToolKind::Patterns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Bandit => "bandit",
            ToolKind::Semgrep => "semgrep",
            ToolKind::Eslint => "eslint",
            ToolKind::Gosec => "gosec",
            ToolKind::Patterns => "patterns",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed native output of one adapter run, before normalization.
#[derive(Debug, Clone)]
pub enum RawFindings {
    Bandit(Vec<bandit::BanditIssue>),
    Semgrep(Vec<semgrep::SemgrepResult>),
    Eslint(Vec<eslint::EslintFileResult>),
    Gosec(Vec<gosec::GosecIssue>),
    Patterns(Vec<patterns::PatternMatch>),
}

impl RawFindings {
    pub fn tool(&self) -> ToolKind {
        match self {
            RawFindings::Bandit(_) => ToolKind::Bandit,
            RawFindings::Semgrep(_) => ToolKind::Semgrep,
            RawFindings::Eslint(_) => ToolKind::Eslint,
            RawFindings::Gosec(_) => ToolKind::Gosec,
            RawFindings::Patterns(_) => ToolKind::Patterns,
        }
    }

    /// Number of individual issues, eslint messages counted one by one.
    pub fn len(&self) -> usize {
        match self {
            RawFindings::Bandit(v) => v.len(),
            RawFindings::Semgrep(v) => v.len(),
            RawFindings::Eslint(v) => v.iter().map(|f| f.messages.len()).sum(),
            RawFindings::Gosec(v) => v.len(),
            RawFindings::Patterns(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 扫描器适配器 trait - 每个外部工具都需要实现此接口
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// 返回扫描器名称
    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Scans the whole workspace. Must not write outside of it.
    async fn run(&self, root: &Path, language: Language) -> Result<RawFindings, ToolError>;
}

pub(crate) fn parse_json<T: DeserializeOwned>(tool: &str, raw: &str) -> Result<T, ToolError> {
    serde_json::from_str(raw.trim()).map_err(|e| ToolError::MalformedOutput {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}
