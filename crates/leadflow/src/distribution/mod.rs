//! Lead distribution and outcome aggregation.
//!
//! The flow: intake (single or bulk) resolves per-source rules into an
//! immediate/delayed plan, the immediate half fans out through a bounded
//! worker pool, the delayed half is timer-scheduled with a per-lead
//! completion countdown, and both paths eventually run an outcome
//! aggregation pass that folds the per-lender logs into one idempotent
//! success record and fires the downstream notification trigger.

pub mod aggregate;
pub mod bulk;
pub mod delayed;
pub mod dispatch;
pub mod domain;
pub mod jobs;
pub mod registry;
pub mod repository;
pub mod router;
pub mod rules;
pub mod service;

#[cfg(test)]
mod tests;

pub use aggregate::OutcomeAggregator;
pub use bulk::{BulkIngestionPipeline, CsvChunkParser, FileChunkParser, RawLeadRow};
pub use delayed::{DelayedScheduler, Scheduler, TokioScheduler};
pub use dispatch::DispatchCoordinator;
pub use domain::{
    DistributionPlan, Lead, LeadId, LeadSubmission, LeadSuccess, LenderDirective, LenderId,
    LenderResult, OutcomeLogEntry, TimeWindow,
};
pub use jobs::{
    DistributionJob, InMemoryJobStore, JobId, JobStatus, JobStore, LenderDispatchSummary,
};
pub use registry::{AdapterError, LenderAdapter, LenderRegistry, SuccessPredicate};
pub use repository::{
    BulkCreateOutcome, DownstreamTrigger, LeadRepository, LeadSuccessStore, OutcomeLogStore,
    RepositoryError, RowFailure,
};
pub use router::{distribution_router, DistributionRouterState};
pub use rules::{NoActiveRuleStore, RuleResolver, RuleStore, RuleStoreError};
pub use service::{DistributionError, LeadDistributionService};
