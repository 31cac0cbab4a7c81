use std::collections::BTreeMap;

use super::domain::{Lead, LeadId, LeadSuccess, LenderId, OutcomeLogEntry};

/// Storage abstraction for leads so the engine can be exercised in isolation.
pub trait LeadRepository: Send + Sync {
    fn create(&self, lead: Lead) -> Result<Lead, RepositoryError>;
    /// Persist a chunk of leads, splitting the outcome per row. Row-level
    /// duplicates land in `failures`; only a store-wide outage is an `Err`.
    fn bulk_create(&self, leads: Vec<Lead>) -> Result<BulkCreateOutcome, RepositoryError>;
    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    /// One-shot write of the immediate fan-out result onto the lead.
    fn set_immediate_successful_lenders(
        &self,
        id: &LeadId,
        lenders: &[LenderId],
    ) -> Result<(), RepositoryError>;
}

/// Per-row split returned by a bulk create.
#[derive(Debug, Clone, Default)]
pub struct BulkCreateOutcome {
    pub created: Vec<Lead>,
    pub failures: Vec<RowFailure>,
}

/// A single rejected row, kept small enough to sample into job errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub reference: String,
    pub reason: String,
}

/// Error enumeration for store failures.
///
/// `DuplicateIdentity` is the one conflict callers are expected to branch on:
/// it distinguishes an already-known phone/identity number from generic
/// validation or availability problems.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("a lead with the same phone or identity number already exists")]
    DuplicateIdentity,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only outcome log, one store per lender. Entries are written
/// independently per adapter invocation; readers tolerate missing stores.
pub trait OutcomeLogStore: Send + Sync {
    fn create(&self, entry: OutcomeLogEntry) -> Result<(), RepositoryError>;
    fn find_by_lead_id(&self, lead_id: &LeadId) -> Result<Vec<OutcomeLogEntry>, RepositoryError>;
}

/// Store for the per-lead success aggregate.
pub trait LeadSuccessStore: Send + Sync {
    /// Find-or-create by lead id. Returns the stored record and whether this
    /// call created it.
    fn find_or_create(&self, seed: LeadSuccess) -> Result<(LeadSuccess, bool), RepositoryError>;
    /// Merge newly-true flags into an existing record via logical OR. A flag
    /// that is already true must never be unset.
    fn update_flags(
        &self,
        lead_id: &LeadId,
        flags: &BTreeMap<LenderId, bool>,
    ) -> Result<(), RepositoryError>;
}

/// Downstream notification/messaging scheduling service.
pub trait DownstreamTrigger: Send + Sync {
    fn schedule_notification(&self, lead_id: &LeadId, successful: &[LenderId]);
}
