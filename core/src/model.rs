//! Canonical records shared by every stage of the scan pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::language::Language;
use crate::workspace::ArchiveKind;

/// Canonical severity. Tool-native severities never leave the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 归一化后的漏洞发现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub rule_id: String,
    pub title: String,
    pub description: String,
    /// Relative to the workspace root, `/`-separated.
    pub file_path: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owasp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    pub tool: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn increment(&mut self, severity: Severity) {
        let slot = match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Info => &mut self.info,
        };
        *slot += 1;
    }

    pub fn add(&mut self, other: &SeverityCounts) {
        self.critical += other.critical;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
        self.info += other.info;
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageStats {
    pub files: usize,
    pub findings: usize,
}

/// Derived from a finding set; regenerable at any time by `aggregate::summarize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub severity_counts: SeverityCounts,
    pub total: usize,
    pub files_scanned: usize,
    pub files_with_findings: usize,
    pub languages_detected: Vec<Language>,
    pub language_stats: BTreeMap<Language, LanguageStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Where the code under analysis comes from. Archive bytes travel with the
/// pipeline, not with the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Archive {
        file_name: String,
        kind: ArchiveKind,
        size_bytes: u64,
    },
    Repository {
        url: String,
        branch: String,
    },
}

impl SourceDescriptor {
    /// Short human label used in reports and log lines.
    pub fn label(&self) -> String {
        match self {
            SourceDescriptor::Archive { file_name, .. } => format!("upload://{}", file_name),
            SourceDescriptor::Repository { url, branch } => format!("{}@{}", url, branch),
        }
    }
}

/// Outcome of one adapter within one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub succeeded: bool,
    pub findings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub source: SourceDescriptor,
    pub language_hint: Option<Language>,
    pub effective_language: Option<Language>,
    #[serde(default)]
    pub detected_languages: Vec<Language>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scan_duration_secs: Option<u64>,
    pub error: Option<String>,
    pub owner: Option<String>,
    /// Free-form label used to group and search scans.
    #[serde(default)]
    pub project_name: Option<String>,
    pub summary: Option<ScanSummary>,
    #[serde(default)]
    pub tool_runs: Vec<ToolRun>,
    #[serde(default)]
    pub report_downloads: u32,
    pub last_report_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(source: SourceDescriptor, language_hint: Option<Language>, owner: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            source,
            language_hint,
            effective_language: None,
            detected_languages: Vec::new(),
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            scan_duration_secs: None,
            error: None,
            owner,
            project_name: None,
            summary: None,
            tool_runs: Vec::new(),
            report_downloads: 0,
            last_report_at: None,
        }
    }

    /// `pending -> running`. Returns false when the job already left `pending`.
    pub fn start(&mut self) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self, summary: ScanSummary) {
        self.summary = Some(summary);
        self.error = None;
        self.finish(JobState::Completed);
    }

    pub fn fail(&mut self, message: impl Into<String>, summary: Option<ScanSummary>) {
        self.error = Some(message.into());
        if summary.is_some() {
            self.summary = summary;
        }
        self.finish(JobState::Failed);
    }

    fn finish(&mut self, state: JobState) {
        let now = Utc::now();
        self.state = state;
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        self.scan_duration_secs = Some((now - started).num_seconds().max(0) as u64);
    }
}

/// What a status query returns. Findings are only filled for terminal jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: ScanJob,
    pub findings: Vec<Finding>,
}
