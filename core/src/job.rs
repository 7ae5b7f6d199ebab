//! Scan job lifecycle: submission, background execution and queries.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregate::{job_statistics, summarize, ScanStats};
use crate::config::EngineConfig;
use crate::error::{CoreError, Result, ValidationError};
use crate::language::{detect_languages, DetectionReport, Language};
use crate::model::{JobId, JobView, ScanJob, SourceDescriptor};
use crate::report::{self, RenderedReport, ReportFormat};
use crate::scanner::dispatcher::{DispatchReport, ScannerDispatcher};
use crate::scanner::ToolKind;
use crate::store::{JobFilter, JobStore};
use crate::workspace::{validate_branch, validate_repository_url, ArchiveKind, Workspace};

pub const DEFAULT_BRANCH: &str = "main";
const INTERRUPTED: &str = "Interrupted: job did not reach a terminal state before the engine stopped";

/// What a caller asks to scan.
#[derive(Debug, Clone)]
pub enum ScanRequest {
    Archive {
        file_name: String,
        bytes: Vec<u8>,
        language: Option<String>,
        owner: Option<String>,
        project_name: Option<String>,
    },
    Repository {
        url: String,
        branch: Option<String>,
        language: Option<String>,
        owner: Option<String>,
        project_name: Option<String>,
    },
}

/// Validated input handed to the background pipeline.
enum PreparedSource {
    Archive { bytes: Vec<u8>, kind: ArchiveKind },
    Repository { url: String, branch: String },
}

/// Blank labels are dropped.
fn new_job(
    source: SourceDescriptor,
    hint: Option<Language>,
    owner: Option<String>,
    project_name: Option<String>,
) -> ScanJob {
    let label = |v: Option<String>| v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let mut job = ScanJob::new(source, hint, label(owner));
    job.project_name = label(project_name);
    job
}

#[derive(Clone)]
pub struct JobManager {
    config: Arc<EngineConfig>,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<ScannerDispatcher>,
}

impl JobManager {
    /// Uses the built-in adapters for every configured tool.
    pub fn new(config: EngineConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let config = Arc::new(config);
        let dispatcher = ScannerDispatcher::with_default_adapters(config.clone())?;
        Ok(Self {
            config,
            store,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: ScannerDispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.clone()
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        self.config.supported_languages()
    }

    /// Each supported language with the tools its scans run.
    pub fn language_tools(&self) -> Vec<(Language, Vec<ToolKind>)> {
        self.config
            .supported_languages()
            .into_iter()
            .map(|lang| (lang, self.config.tool_plan(lang)))
            .collect()
    }

    /// Validates the request, stores a `pending` job and schedules the
    /// pipeline. Returns as soon as the record exists.
    pub async fn submit(&self, request: ScanRequest) -> Result<JobId> {
        let (source, job) = self.prepare(request)?;
        self.store.create_job(&job).await?;
        tracing::info!(job_id = %job.id, source = %job.source.label(), "Scan job submitted");

        let job_id = job.id;
        self.spawn_pipeline(job, source);
        Ok(job_id)
    }

    fn prepare(&self, request: ScanRequest) -> Result<(PreparedSource, ScanJob)> {
        match request {
            ScanRequest::Archive {
                file_name,
                bytes,
                language,
                owner,
                project_name,
            } => {
                let hint = self.parse_language(language.as_deref())?;
                if bytes.is_empty() {
                    return Err(ValidationError::EmptyArchive.into());
                }
                let size = bytes.len() as u64;
                if size > self.config.max_archive_bytes {
                    return Err(ValidationError::ArchiveTooLarge {
                        size,
                        limit: self.config.max_archive_bytes,
                    }
                    .into());
                }
                let kind = ArchiveKind::from_file_name(&file_name)?;
                let descriptor = SourceDescriptor::Archive {
                    file_name,
                    kind,
                    size_bytes: size,
                };
                let job = new_job(descriptor, hint, owner, project_name);
                Ok((PreparedSource::Archive { bytes, kind }, job))
            }
            ScanRequest::Repository {
                url,
                branch,
                language,
                owner,
                project_name,
            } => {
                let hint = self.parse_language(language.as_deref())?;
                let url = url.trim().to_string();
                validate_repository_url(&url)?;
                let branch = branch
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
                validate_branch(&branch)?;
                let descriptor = SourceDescriptor::Repository {
                    url: url.clone(),
                    branch: branch.clone(),
                };
                let job = new_job(descriptor, hint, owner, project_name);
                Ok((PreparedSource::Repository { url, branch }, job))
            }
        }
    }

    /// Blank means no hint. Anything else must be a configured language.
    fn parse_language(&self, raw: Option<&str>) -> Result<Option<Language>> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };
        let language: Language = raw.parse()?;
        if !self.config.is_supported(language) {
            return Err(ValidationError::UnsupportedLanguage(raw.to_string()).into());
        }
        Ok(Some(language))
    }

    /// Runs the pipeline in its own task. A supervisor awaits it and
    /// fails the job if the task dies without writing a terminal state.
    fn spawn_pipeline(&self, job: ScanJob, source: PreparedSource) {
        let supervisor = self.clone();
        let worker = self.clone();
        let job_id = job.id;

        tokio::spawn(async move {
            let handle = tokio::spawn(async move { worker.execute(job, source).await });
            if let Err(join_err) = handle.await {
                tracing::error!(job_id = %job_id, "Scan pipeline aborted: {}", join_err);
                supervisor
                    .fail_if_unfinished(job_id, "Panicked: scan pipeline aborted unexpectedly")
                    .await;
            }
        });
    }

    async fn execute(&self, mut job: ScanJob, source: PreparedSource) {
        let job_id = job.id;
        if !job.start() {
            return;
        }
        if let Err(e) = self.store.update_job_state(&job).await {
            tracing::error!(job_id = %job_id, "Failed to mark job running: {}", e);
        }
        tracing::info!(job_id = %job_id, "Scan started");

        match self.run_pipeline(&mut job, source).await {
            Ok((detection, report)) => {
                let summary = summarize(&report.findings, &detection);
                job.tool_runs = report.tool_runs;
                match self.store.append_findings(job_id, &report.findings).await {
                    Ok(()) => job.complete(summary),
                    Err(e) => {
                        tracing::error!(job_id = %job_id, "Failed to persist findings: {}", e);
                        job.fail(e.job_message(), None);
                    }
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, "Scan failed: {}", e);
                job.fail(e.job_message(), None);
            }
        }

        if let Err(e) = self.store.update_job_state(&job).await {
            tracing::error!(job_id = %job_id, "Failed to persist terminal state: {}", e);
            return;
        }
        tracing::info!(
            job_id = %job_id,
            state = %job.state,
            findings = job.summary.as_ref().map_or(0, |s| s.total),
            duration_secs = job.scan_duration_secs.unwrap_or(0),
            "Scan finished"
        );
    }

    /// Acquire, detect, dispatch. The workspace is gone when this returns.
    async fn run_pipeline(
        &self,
        job: &mut ScanJob,
        source: PreparedSource,
    ) -> Result<(DetectionReport, DispatchReport)> {
        let workspace = self.provision(source).await?;
        let outcome = self.scan_workspace(job, &workspace).await;
        if let Err(e) = workspace.close() {
            tracing::warn!(job_id = %job.id, "Workspace cleanup failed: {}", e);
        }
        outcome
    }

    async fn provision(&self, source: PreparedSource) -> Result<Workspace> {
        let base = self.config.workspace_base();
        match source {
            PreparedSource::Archive { bytes, kind } => {
                Workspace::from_archive(&base, bytes, kind, self.config.max_extracted_bytes).await
            }
            PreparedSource::Repository { url, branch } => {
                Workspace::from_repository(
                    &base,
                    &url,
                    &branch,
                    &self.config.tools.git,
                    self.config.clone_timeout(),
                )
                .await
            }
        }
    }

    async fn scan_workspace(
        &self,
        job: &mut ScanJob,
        workspace: &Workspace,
    ) -> Result<(DetectionReport, DispatchReport)> {
        let root: PathBuf = workspace.root().to_path_buf();
        let detection = tokio::task::spawn_blocking(move || detect_languages(&root))
            .await
            .map_err(|e| {
                CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("language detection task failed: {}", e),
                ))
            })??;

        job.detected_languages = detection.languages();
        let language = detection.effective_language(job.language_hint)?;
        if let Some(hint) = job.language_hint {
            if hint != language {
                tracing::warn!(
                    job_id = %job.id,
                    "Declared language {} not found in workspace, scanning as {}",
                    hint,
                    language
                );
            }
        }
        job.effective_language = Some(language);

        let report = self.dispatcher.dispatch(workspace.root(), language).await;
        if report.all_failed() {
            tracing::warn!(job_id = %job.id, "Every scanner failed; completing with no findings");
        }
        Ok((detection, report))
    }

    async fn fail_if_unfinished(&self, job_id: JobId, message: &str) {
        let stored = match self.store.get_job(job_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(job_id = %job_id, "Failed to load job: {}", e);
                return;
            }
        };
        let mut job = stored.job;
        if job.state.is_terminal() {
            return;
        }
        job.fail(message, None);
        if let Err(e) = self.store.update_job_state(&job).await {
            tracing::error!(job_id = %job_id, "Failed to mark job failed: {}", e);
        }
    }

    /// Fails jobs left `pending` or `running` by a previous process.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let jobs = self.store.list_jobs(&JobFilter::default()).await?;
        let mut recovered = 0;
        for mut job in jobs.into_iter().filter(|j| !j.state.is_terminal()) {
            job.fail(INTERRUPTED, None);
            self.store.update_job_state(&job).await?;
            recovered += 1;
        }
        if recovered > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", recovered);
        }
        Ok(recovered)
    }

    /// Findings are only attached once the job is terminal.
    pub async fn status(&self, job_id: JobId) -> Result<JobView> {
        let stored = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;
        let findings = if stored.job.state.is_terminal() {
            stored.findings
        } else {
            Vec::new()
        };
        Ok(JobView {
            job: stored.job,
            findings,
        })
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<ScanJob>> {
        self.store.list_jobs(filter).await
    }

    pub async fn delete(&self, job_id: JobId) -> Result<()> {
        if !self.store.delete_job(job_id).await? {
            return Err(CoreError::NotFound(job_id.to_string()));
        }
        tracing::info!(job_id = %job_id, "Scan job deleted");
        Ok(())
    }

    /// Renders a report and records the access on the job.
    pub async fn export(&self, job_id: JobId, format: ReportFormat) -> Result<RenderedReport> {
        let view = self.status(job_id).await?;
        let rendered = report::export(&view, format)?;

        if let Err(e) = self.store.record_report_download(job_id, Utc::now()).await {
            tracing::warn!(job_id = %job_id, "Failed to record report download: {}", e);
        }
        Ok(rendered)
    }

    pub async fn stats(&self) -> Result<ScanStats> {
        let jobs = self.store.list_jobs(&JobFilter::default()).await?;
        Ok(job_statistics(&jobs, self.supported_languages()))
    }

    /// Jobs matching `filter`, ignoring its paging.
    pub async fn count(&self, filter: &JobFilter) -> Result<usize> {
        let filter = JobFilter {
            limit: None,
            offset: 0,
            ..filter.clone()
        };
        Ok(self.store.list_jobs(&filter).await?.len())
    }
}
