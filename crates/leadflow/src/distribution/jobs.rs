use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::LenderId;
use super::repository::RepositoryError;

/// Identifier wrapper for bulk distribution jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl JobId {
    pub fn generate() -> Self {
        let id = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        JobId(format!("job-{id:06}"))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Per-lender dispatch totals recorded at job completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderDispatchSummary {
    pub dispatched: usize,
    pub successful: usize,
}

/// Only this many row-level failure details are kept per job; the counters
/// stay exact regardless.
const MAX_ERROR_SAMPLES: usize = 25;

/// Progress and outcome of one bulk ingestion job. Lives in memory for the
/// process lifetime; polling is only meaningful against the instance that
/// accepted the upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_leads: usize,
    pub successful_leads: usize,
    pub failed_leads: usize,
    pub lender_summaries: BTreeMap<LenderId, LenderDispatchSummary>,
    pub errors: Vec<String>,
}

impl DistributionJob {
    pub fn start() -> Self {
        Self {
            job_id: JobId::generate(),
            status: JobStatus::Processing,
            started_at: Utc::now(),
            completed_at: None,
            total_leads: 0,
            successful_leads: 0,
            failed_leads: 0,
            lender_summaries: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Fold one chunk's split into the running totals, sampling failure
    /// details up to the cap.
    pub fn record_chunk<I>(&mut self, successful: usize, failed: usize, samples: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.total_leads += successful + failed;
        self.successful_leads += successful;
        self.failed_leads += failed;
        for sample in samples {
            if self.errors.len() >= MAX_ERROR_SAMPLES {
                break;
            }
            self.errors.push(sample);
        }
    }

    pub fn record_lender(&mut self, lender: LenderId, summary: LenderDispatchSummary) {
        self.lender_summaries.insert(lender, summary);
    }

    /// Transition to Completed. Terminal states are final: calling this on an
    /// already-terminal job is a no-op.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        if self.status == JobStatus::Processing {
            self.status = JobStatus::Completed;
            self.completed_at = Some(at);
        }
    }

    /// Transition to Failed with a single top-level error. No-op once
    /// terminal.
    pub fn mark_failed(&mut self, at: DateTime<Utc>, error: String) {
        if self.status == JobStatus::Processing {
            self.status = JobStatus::Failed;
            self.completed_at = Some(at);
            self.errors.push(error);
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status.label(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_leads: self.total_leads,
            successful_leads: self.successful_leads,
            failed_leads: self.failed_leads,
            lender_summaries: self.lender_summaries.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Serialized job status exposed by the job read endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_leads: usize,
    pub successful_leads: usize,
    pub failed_leads: usize,
    pub lender_summaries: BTreeMap<LenderId, LenderDispatchSummary>,
    pub errors: Vec<String>,
}

/// Injected job-progress store, keyed by job id.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: DistributionJob) -> Result<(), RepositoryError>;
    fn fetch(&self, job_id: &JobId) -> Result<Option<DistributionJob>, RepositoryError>;
    fn update(&self, job: DistributionJob) -> Result<(), RepositoryError>;
}

/// Process-lifetime job store. Job state does not survive a restart.
#[derive(Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, DistributionJob>>>,
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: DistributionJob) -> Result<(), RepositoryError> {
        let mut guard = self.jobs.lock().expect("job store mutex poisoned");
        guard.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn fetch(&self, job_id: &JobId) -> Result<Option<DistributionJob>, RepositoryError> {
        let guard = self.jobs.lock().expect("job store mutex poisoned");
        Ok(guard.get(job_id).cloned())
    }

    fn update(&self, job: DistributionJob) -> Result<(), RepositoryError> {
        let mut guard = self.jobs.lock().expect("job store mutex poisoned");
        if guard.contains_key(&job.job_id) {
            guard.insert(job.job_id.clone(), job);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}
