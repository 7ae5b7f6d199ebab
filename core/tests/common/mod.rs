#![allow(dead_code)]

use async_trait::async_trait;
use sastgate_core::error::ToolError;
use sastgate_core::scanner::patterns::PatternMatch;
use chrono::{DateTime, Utc};
use sastgate_core::error::Result as CoreResult;
use sastgate_core::{
    EngineConfig, Finding, JobFilter, JobId, JobManager, JobStore, JobView, Language,
    MemoryJobStore, RawFindings, ScanJob, ScannerAdapter, Severity, StoredJob, ToolCommands,
    ToolKind,
};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Site rules checked in next to the tests.
pub fn fixture_rules_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rules")
}

/// External tools point at binaries that do not exist, so only the
/// fixture site rules produce findings.
pub fn config(workspace_dir: &Path) -> EngineConfig {
    EngineConfig {
        tool_timeout_secs: 30,
        clone_timeout_secs: 30,
        workspace_dir: Some(workspace_dir.to_path_buf()),
        rules_dir: Some(fixture_rules_dir()),
        tools: ToolCommands {
            bandit: "/nonexistent/sastgate/bandit".to_string(),
            semgrep: "/nonexistent/sastgate/semgrep".to_string(),
            eslint: "/nonexistent/sastgate/eslint".to_string(),
            gosec: "/nonexistent/sastgate/gosec".to_string(),
            git: "git".to_string(),
        },
        ..EngineConfig::default()
    }
}

pub fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_gz_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&tar).unwrap();
    gz.finish().unwrap()
}

pub async fn wait_terminal(manager: &JobManager, id: JobId) -> JobView {
    for _ in 0..1500 {
        let view = manager.status(id).await.unwrap();
        if view.job.state.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish in time", id);
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

pub fn assert_counts_consistent(view: &JobView) {
    let summary = view.job.summary.as_ref().expect("terminal job has a summary");
    assert_eq!(summary.severity_counts.total(), summary.total);
    assert_eq!(summary.total, view.findings.len());
}

fn fixed_matches(root: &Path, count: usize) -> Vec<PatternMatch> {
    (0..count)
        .map(|i| PatternMatch {
            rule_id: format!("FAKE-{}", i),
            title: "fake finding".to_string(),
            description: "produced by a test adapter".to_string(),
            severity: Severity::High,
            file_path: root.join("app.py"),
            line: i + 1,
            column: None,
            snippet: None,
            cwe: None,
            owasp: None,
            category: Some("test".to_string()),
        })
        .collect()
}

/// Returns `count` high findings against `app.py`.
pub struct FixedAdapter {
    pub kind: ToolKind,
    pub count: usize,
}

#[async_trait]
impl ScannerAdapter for FixedAdapter {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn run(&self, root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        Ok(RawFindings::Patterns(fixed_matches(root, self.count)))
    }
}

pub struct TimingOutAdapter(pub ToolKind);

#[async_trait]
impl ScannerAdapter for TimingOutAdapter {
    fn kind(&self) -> ToolKind {
        self.0
    }

    async fn run(&self, _root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        Err(ToolError::Timeout {
            tool: self.0.to_string(),
            secs: 30,
        })
    }
}

/// Blocks until the test releases it.
pub struct GatedAdapter {
    pub kind: ToolKind,
    pub gate: Arc<Notify>,
}

#[async_trait]
impl ScannerAdapter for GatedAdapter {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    async fn run(&self, root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        self.gate.notified().await;
        Ok(RawFindings::Patterns(fixed_matches(root, 1)))
    }
}

pub struct PanickingAdapter(pub ToolKind);

#[async_trait]
impl ScannerAdapter for PanickingAdapter {
    fn kind(&self) -> ToolKind {
        self.0
    }

    async fn run(&self, _root: &Path, _language: Language) -> Result<RawFindings, ToolError> {
        panic!("scanner bug");
    }
}

/// Memory store whose `append_findings` panics, to kill a pipeline after
/// the scanners have run.
#[derive(Default)]
pub struct PanickingStore {
    inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for PanickingStore {
    async fn create_job(&self, job: &ScanJob) -> CoreResult<()> {
        self.inner.create_job(job).await
    }

    async fn update_job_state(&self, job: &ScanJob) -> CoreResult<()> {
        self.inner.update_job_state(job).await
    }

    async fn append_findings(&self, _job_id: JobId, _findings: &[Finding]) -> CoreResult<()> {
        panic!("store bug");
    }

    async fn get_job(&self, job_id: JobId) -> CoreResult<Option<StoredJob>> {
        self.inner.get_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> CoreResult<Vec<ScanJob>> {
        self.inner.list_jobs(filter).await
    }

    async fn delete_job(&self, job_id: JobId) -> CoreResult<bool> {
        self.inner.delete_job(job_id).await
    }

    async fn record_report_download(&self, job_id: JobId, at: DateTime<Utc>) -> CoreResult<()> {
        self.inner.record_report_download(job_id, at).await
    }
}
