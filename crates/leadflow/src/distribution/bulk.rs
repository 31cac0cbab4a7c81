use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::DistributionConfig;

use super::dispatch::DispatchCoordinator;
use super::domain::{Lead, LeadSubmission, LenderId};
use super::jobs::{DistributionJob, JobId, JobStore, LenderDispatchSummary};
use super::repository::{LeadRepository, RowFailure};

/// Raw row shape produced by a batch-file parser. Optional columns default
/// when the partner file omits them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawLeadRow {
    pub full_name: String,
    pub phone: String,
    pub national_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub employer: Option<String>,
    #[serde(default)]
    pub gross_monthly_income: Option<u32>,
    #[serde(default)]
    pub consent: Option<bool>,
}

impl RawLeadRow {
    fn into_submission(self, source: &str) -> LeadSubmission {
        LeadSubmission {
            source: source.to_string(),
            full_name: self.full_name,
            phone: self.phone,
            national_id: self.national_id,
            email: self.email,
            employer: self.employer,
            gross_monthly_income: self.gross_monthly_income,
            // batch uploads are partner-collected, consent defaults granted
            consent: self.consent.unwrap_or(true),
        }
    }
}

/// Fatal, unrecoverable batch-file error; fails the whole job.
#[derive(Debug, thiserror::Error)]
pub enum BulkFileError {
    #[error("could not open batch file: {0}")]
    Open(#[from] std::io::Error),
}

/// A single unreadable row; captured per-row, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("row {row}: {reason}")]
pub struct RowParseError {
    pub row: usize,
    pub reason: String,
}

pub type RowIter = Box<dyn Iterator<Item = Result<RawLeadRow, RowParseError>> + Send>;

/// Streams a batch file as raw rows.
pub trait FileChunkParser: Send + Sync {
    fn rows(&self, path: &Path) -> Result<RowIter, BulkFileError>;
}

/// CSV implementation of the batch-file parser.
pub struct CsvChunkParser;

impl FileChunkParser for CsvChunkParser {
    fn rows(&self, path: &Path) -> Result<RowIter, BulkFileError> {
        let file = std::fs::File::open(path)?;
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);
        Ok(Box::new(reader.into_deserialize::<RawLeadRow>().enumerate().map(
            |(index, result)| {
                result.map_err(|err| RowParseError {
                    row: index + 1,
                    reason: err.to_string(),
                })
            },
        )))
    }
}

/// Drives file-based ingestion through the same dispatch machinery as single
/// leads, under a two-level batching/backpressure policy.
///
/// Acceptance is fire-and-forget: `ingest` registers a Processing job and
/// returns its id; parsing, persistence, and lender fan-out continue on a
/// background task that reports progress through the job store.
#[derive(Clone)]
pub struct BulkIngestionPipeline {
    parser: Arc<dyn FileChunkParser>,
    leads: Arc<dyn LeadRepository>,
    coordinator: DispatchCoordinator,
    jobs: Arc<dyn JobStore>,
    config: DistributionConfig,
}

impl BulkIngestionPipeline {
    pub fn new(
        parser: Arc<dyn FileChunkParser>,
        leads: Arc<dyn LeadRepository>,
        coordinator: DispatchCoordinator,
        jobs: Arc<dyn JobStore>,
        config: DistributionConfig,
    ) -> Self {
        Self {
            parser,
            leads,
            coordinator,
            jobs,
            config,
        }
    }

    /// Accept a spooled batch file for the given source and lender list.
    /// Returns the job id synchronously; processing is asynchronous.
    pub fn ingest(&self, path: PathBuf, lenders: Vec<LenderId>, source: String) -> JobId {
        let job = DistributionJob::start();
        let job_id = job.job_id.clone();
        if let Err(err) = self.jobs.insert(job) {
            warn!(job = %job_id, error = %err, "could not register bulk job");
        }
        info!(job = %job_id, source, lenders = lenders.len(), "bulk ingestion accepted");

        let pipeline = self.clone();
        let spawned_job = job_id.clone();
        tokio::spawn(async move {
            pipeline.run(path, lenders, source, spawned_job).await;
        });
        job_id
    }

    async fn run(&self, path: PathBuf, lenders: Vec<LenderId>, source: String, job_id: JobId) {
        let parsed = self.persist_file(&path, &source, &job_id).await;

        // the upload is removed on the success and fatal paths alike
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(job = %job_id, error = %err, "could not remove spooled batch file");
        }

        match parsed {
            Ok(created) => {
                self.dispatch_to_lenders(&created, &lenders, &job_id).await;
                self.finish(&job_id, None);
            }
            Err(fatal) => {
                error!(job = %job_id, error = %fatal, "bulk ingestion failed");
                self.finish(&job_id, Some(fatal.to_string()));
            }
        }
    }

    /// Stream the file in chunks of `DB_BATCH_SIZE`, persisting each chunk
    /// and yielding control between chunks so the pipeline never monopolizes
    /// the runtime.
    async fn persist_file(
        &self,
        path: &Path,
        source: &str,
        job_id: &JobId,
    ) -> Result<Vec<Lead>, BulkFileError> {
        let rows = self.parser.rows(path)?;
        let chunk_size = self.config.db_batch_size.max(1);

        let mut created = Vec::new();
        let mut chunk: Vec<Result<RawLeadRow, RowParseError>> = Vec::with_capacity(chunk_size);
        for row in rows {
            chunk.push(row);
            if chunk.len() == chunk_size {
                self.persist_chunk(std::mem::take(&mut chunk), source, job_id, &mut created);
                tokio::task::yield_now().await;
            }
        }
        if !chunk.is_empty() {
            self.persist_chunk(chunk, source, job_id, &mut created);
        }
        Ok(created)
    }

    fn persist_chunk(
        &self,
        rows: Vec<Result<RawLeadRow, RowParseError>>,
        source: &str,
        job_id: &JobId,
        created: &mut Vec<Lead>,
    ) {
        let chunk_rows = rows.len();
        let mut failures: Vec<RowFailure> = Vec::new();
        let mut leads = Vec::new();
        for row in rows {
            match row {
                Ok(raw) => leads.push(Lead::from_submission(raw.into_submission(source))),
                Err(err) => failures.push(RowFailure {
                    reference: format!("row {}", err.row),
                    reason: err.reason,
                }),
            }
        }

        let mut successful = 0;
        match self.leads.bulk_create(leads) {
            Ok(outcome) => {
                successful = outcome.created.len();
                failures.extend(outcome.failures);
                created.extend(outcome.created);
            }
            Err(err) => {
                // a store outage fails this chunk's rows, not the job
                failures.push(RowFailure {
                    reference: "chunk".to_string(),
                    reason: err.to_string(),
                });
                warn!(job = %job_id, error = %err, "bulk create failed for a chunk");
            }
        }

        let failed = chunk_rows - successful;
        let samples: Vec<String> = failures
            .into_iter()
            .map(|failure| format!("{}: {}", failure.reference, failure.reason))
            .collect();
        self.update_job(job_id, |job| job.record_chunk(successful, failed, samples));
    }

    /// Fan the saved leads out to every selected lender. Lenders proceed
    /// concurrently and independently; inside each lender the leads are
    /// grouped into rounds of `LENDER_BATCH_SIZE x LENDER_CONCURRENCY`, the
    /// round's batches dispatched concurrently through the bounded pool, and
    /// a fixed pause separates rounds (not batches within a round).
    async fn dispatch_to_lenders(&self, leads: &[Lead], lenders: &[LenderId], job_id: &JobId) {
        let mut fan_out = JoinSet::new();
        for lender in lenders.iter().copied() {
            let pipeline = self.clone();
            let leads = leads.to_vec();
            fan_out.spawn(async move {
                let summary = pipeline.dispatch_rounds(lender, &leads).await;
                (lender, summary)
            });
        }
        while let Some(joined) = fan_out.join_next().await {
            match joined {
                Ok((lender, summary)) => {
                    self.update_job(job_id, |job| job.record_lender(lender, summary));
                }
                Err(err) => warn!(job = %job_id, error = %err, "lender fan-out task aborted"),
            }
        }
    }

    async fn dispatch_rounds(&self, lender: LenderId, leads: &[Lead]) -> LenderDispatchSummary {
        let batch_size = self.config.lender_batch_size.max(1);
        let concurrency = self.config.lender_concurrency.max(1);
        let round_size = batch_size * concurrency;

        let mut summary = LenderDispatchSummary::default();
        for (round_index, round) in leads.chunks(round_size).enumerate() {
            if round_index > 0 {
                tokio::time::sleep(self.config.lender_batch_delay).await;
            }

            let mut batches = JoinSet::new();
            for batch in round.chunks(batch_size) {
                let coordinator = self.coordinator.clone();
                let batch = batch.to_vec();
                batches.spawn(async move {
                    let mut dispatched = 0usize;
                    let mut successful = 0usize;
                    for lead in &batch {
                        if lender.matches_source(&lead.source) {
                            continue;
                        }
                        dispatched += 1;
                        if coordinator.dispatch_one(lead, lender).await {
                            successful += 1;
                        }
                    }
                    (dispatched, successful)
                });
            }
            while let Some(joined) = batches.join_next().await {
                match joined {
                    Ok((dispatched, successful)) => {
                        summary.dispatched += dispatched;
                        summary.successful += successful;
                    }
                    Err(err) => warn!(lender = %lender, error = %err, "batch task aborted"),
                }
            }
        }
        summary
    }

    fn finish(&self, job_id: &JobId, fatal: Option<String>) {
        let now = Utc::now();
        self.update_job(job_id, |job| match fatal {
            None => job.mark_completed(now),
            Some(message) => job.mark_failed(now, message),
        });
    }

    fn update_job<F>(&self, job_id: &JobId, apply: F)
    where
        F: FnOnce(&mut DistributionJob),
    {
        match self.jobs.fetch(job_id) {
            Ok(Some(mut job)) => {
                apply(&mut job);
                if let Err(err) = self.jobs.update(job) {
                    warn!(job = %job_id, error = %err, "could not update bulk job");
                }
            }
            Ok(None) => warn!(job = %job_id, "bulk job missing from store"),
            Err(err) => warn!(job = %job_id, error = %err, "job store unreachable"),
        }
    }
}
