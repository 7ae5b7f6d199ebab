// SASTGate Core Library
// 核心功能库，包含工作区、语言识别、扫描器调度、结果归一化、聚合与报告导出

pub mod aggregate;
pub mod config;
pub mod job;
pub mod language;
pub mod model;
pub mod normalize;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod store;
pub mod workspace;

// 重新导出常用类型
pub use aggregate::{summarize, ScanStats};
pub use config::{EngineConfig, ToolCommands};
pub use job::{JobManager, ScanRequest};
pub use language::{detect_languages, DetectionReport, Language};
pub use model::{
    Finding, JobId, JobState, JobView, ScanJob, ScanSummary, Severity, SeverityCounts,
    SourceDescriptor, ToolRun,
};
pub use report::{export, RenderedReport, ReportFormat};
pub use scanner::dispatcher::{DispatchReport, ScannerDispatcher};
pub use scanner::{RawFindings, ScannerAdapter, ToolKind};
pub use store::{JobFilter, JobStore, MemoryJobStore, StoredJob};
pub use workspace::{ArchiveKind, Workspace};

pub mod error {
    use thiserror::Error;

    use crate::model::{JobId, JobState};

    /// Caller mistakes caught before any job record exists.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ValidationError {
        #[error("archive is {size} bytes, limit is {limit} bytes")]
        ArchiveTooLarge { size: u64, limit: u64 },

        #[error("archive is empty")]
        EmptyArchive,

        #[error("unsupported archive format: {0}")]
        UnsupportedFormat(String),

        #[error("invalid source: {0}")]
        InvalidSource(String),

        #[error("unsupported language: {0}")]
        UnsupportedLanguage(String),
    }

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("{0}")]
        Validation(#[from] ValidationError),

        #[error("source acquisition failed: {0}")]
        SourceAcquisition(String),

        #[error("no scannable source files found")]
        NoScannableCode,

        #[error("job {0} not found")]
        NotFound(String),

        #[error("job {job_id} is {state}, report not ready")]
        JobNotReady { job_id: JobId, state: JobState },

        #[error("{0} is not implemented")]
        NotImplemented(String),

        #[error("store error: {0}")]
        Store(String),

        #[error("config error: {0}")]
        Config(String),
    }

    impl CoreError {
        /// Taxonomy tag used as the prefix of a failed job's error message.
        pub fn kind(&self) -> &'static str {
            match self {
                CoreError::Io(_) => "IoError",
                CoreError::Validation(_) => "ValidationError",
                CoreError::SourceAcquisition(_) => "SourceAcquisitionError",
                CoreError::NoScannableCode => "NoScannableCode",
                CoreError::NotFound(_) => "NotFound",
                CoreError::JobNotReady { .. } => "JobNotReady",
                CoreError::NotImplemented(_) => "NotImplemented",
                CoreError::Store(_) => "StoreError",
                CoreError::Config(_) => "ConfigError",
            }
        }

        /// Message recorded on a job that ended in `failed`.
        pub fn job_message(&self) -> String {
            format!("{}: {}", self.kind(), self)
        }
    }

    /// One adapter's failure. Absorbed by the dispatcher, never fails a job.
    #[derive(Error, Debug)]
    pub enum ToolError {
        #[error("{tool} is not installed ({command})")]
        NotInstalled { tool: String, command: String },

        #[error("failed to spawn {tool}: {source}")]
        Spawn {
            tool: String,
            #[source]
            source: std::io::Error,
        },

        #[error("{tool} timed out after {secs}s")]
        Timeout { tool: String, secs: u64 },

        #[error("{tool} exited with {code:?} and no usable output: {stderr}")]
        Exit {
            tool: String,
            code: Option<i32>,
            stderr: String,
        },

        #[error("{tool} produced malformed output: {reason}")]
        MalformedOutput { tool: String, reason: String },

        #[error("{tool} adapter panicked")]
        Panicked { tool: String },
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
