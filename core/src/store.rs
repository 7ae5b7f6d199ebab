//! Persistence collaborator consumed by the job manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};
use crate::model::{Finding, JobId, JobState, ScanJob};

/// A job record together with the findings appended to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: ScanJob,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub state: Option<JobState>,
    /// Case-insensitive substring of the project name.
    #[serde(default)]
    pub project_name: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl JobFilter {
    pub fn matches(&self, job: &ScanJob) -> bool {
        if self.state.map_or(false, |state| job.state != state) {
            return false;
        }
        match &self.project_name {
            Some(term) => job
                .project_name
                .as_deref()
                .map_or(false, |name| name.to_lowercase().contains(&term.to_lowercase())),
            None => true,
        }
    }
}

/// Writes are scoped to one job id; implementations need no cross-job locking.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &ScanJob) -> Result<()>;

    /// Overwrites the stored record with `job`.
    async fn update_job_state(&self, job: &ScanJob) -> Result<()>;

    async fn append_findings(&self, job_id: JobId, findings: &[Finding]) -> Result<()>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<StoredJob>>;

    /// Newest first. Findings are not loaded.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ScanJob>>;

    /// Returns false when the job did not exist.
    async fn delete_job(&self, job_id: JobId) -> Result<bool>;

    /// Bumps `report_downloads` and stamps `last_report_at` in one step,
    /// so concurrent exports never lose a count.
    async fn record_report_download(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &ScanJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(CoreError::Store(format!("job {} already exists", job.id)));
        }
        jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                findings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn update_job_state(&self, job: &ScanJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| CoreError::NotFound(job.id.to_string()))?;
        stored.job = job.clone();
        Ok(())
    }

    async fn append_findings(&self, job_id: JobId, findings: &[Finding]) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;
        stored.findings.extend_from_slice(findings);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<StoredJob>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ScanJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<ScanJob> = jobs
            .values()
            .filter(|stored| filter.matches(&stored.job))
            .map(|stored| stored.job.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        Ok(self.jobs.write().await.remove(&job_id).is_some())
    }

    async fn record_report_download(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;
        stored.job.report_downloads += 1;
        stored.job.last_report_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceDescriptor;

    fn job() -> ScanJob {
        ScanJob::new(
            SourceDescriptor::Repository {
                url: "https://example.com/r.git".to_string(),
                branch: "main".to_string(),
            },
            None,
            Some("alice".to_string()),
        )
    }

    #[tokio::test]
    async fn create_update_and_read_back() {
        let store = MemoryJobStore::new();
        let mut j = job();
        store.create_job(&j).await.unwrap();
        assert!(store.create_job(&j).await.is_err());

        j.start();
        store.update_job_state(&j).await.unwrap();
        let stored = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(stored.job.state, JobState::Running);
        assert!(stored.findings.is_empty());

        assert!(store.get_job(JobId::new()).await.unwrap().is_none());
        assert!(matches!(
            store.append_findings(JobId::new(), &[]).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_newest_first_with_filters() {
        let store = MemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let mut j = job();
            j.created_at = j.created_at + chrono::Duration::seconds(i);
            if i % 2 == 0 {
                j.fail("x", None);
            }
            store.create_job(&j).await.unwrap();
            ids.push(j.id);
        }

        let all = store.list_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, ids[3]);

        let failed = JobFilter {
            state: Some(JobState::Failed),
            ..JobFilter::default()
        };
        let listed = store.list_jobs(&failed).await.unwrap();
        assert_eq!(listed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[0]]);

        let page = JobFilter {
            limit: Some(2),
            offset: 1,
            ..JobFilter::default()
        };
        let listed = store.list_jobs(&page).await.unwrap();
        assert_eq!(listed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        assert!(store.delete_job(ids[0]).await.unwrap());
        assert!(!store.delete_job(ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn project_name_filter_is_a_case_insensitive_substring() {
        let store = MemoryJobStore::new();
        for name in [Some("Billing-API"), Some("billing-web"), Some("Payments"), None] {
            let mut j = job();
            j.project_name = name.map(str::to_string);
            store.create_job(&j).await.unwrap();
        }

        let filter = JobFilter {
            project_name: Some("BILLING".to_string()),
            ..JobFilter::default()
        };
        let mut names: Vec<_> = store
            .list_jobs(&filter)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|j| j.project_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Billing-API", "billing-web"]);

        let filter = JobFilter {
            state: Some(JobState::Failed),
            project_name: Some("billing".to_string()),
            ..JobFilter::default()
        };
        assert!(store.list_jobs(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_download_records_are_all_counted() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let j = job();
        store.create_job(&j).await.unwrap();

        let id = j.id;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_report_download(id, Utc::now()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(stored.job.report_downloads, 16);
        assert!(stored.job.last_report_at.is_some());
        assert!(matches!(
            store.record_report_download(JobId::new(), Utc::now()).await,
            Err(CoreError::NotFound(_))
        ));
    }
}
