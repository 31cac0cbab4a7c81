use std::sync::Arc;

use tracing::info;

use super::delayed::DelayedScheduler;
use super::dispatch::DispatchCoordinator;
use super::domain::{Lead, LeadSubmission};
use super::repository::{LeadRepository, RepositoryError};
use super::rules::RuleResolver;

/// Service composing rule resolution, dispatch, and delayed scheduling for
/// single-lead intake.
#[derive(Clone)]
pub struct LeadDistributionService {
    leads: Arc<dyn LeadRepository>,
    rules: RuleResolver,
    coordinator: DispatchCoordinator,
    delayed: DelayedScheduler,
}

impl LeadDistributionService {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        rules: RuleResolver,
        coordinator: DispatchCoordinator,
        delayed: DelayedScheduler,
    ) -> Self {
        Self {
            leads,
            rules,
            coordinator,
            delayed,
        }
    }

    /// Accept a new lead and kick off distribution in the background.
    ///
    /// The submission response depends only on lead creation; dispatch
    /// outcomes, including adapter failures, never surface here.
    pub fn submit(&self, submission: LeadSubmission) -> Result<Lead, DistributionError> {
        if !submission.consent {
            return Err(DistributionError::ConsentRequired);
        }

        let stored = self.leads.create(Lead::from_submission(submission))?;
        info!(lead = %stored.lead_id, source = %stored.source, "lead accepted");

        let service = self.clone();
        let lead = stored.clone();
        tokio::spawn(async move {
            service.distribute(lead).await;
        });

        Ok(stored)
    }

    /// Run one full distribution pass for a lead: resolve the plan, execute
    /// the immediate half, persist successes, and schedule the delayed half
    /// plus the settle-delay aggregation paths.
    pub async fn distribute(&self, lead: Lead) {
        let plan = self.rules.resolve(&lead.source);

        let successful = self
            .coordinator
            .dispatch_immediate(&lead, &plan.immediate)
            .await;
        self.coordinator
            .record_immediate_successes(&lead.lead_id, &successful);

        let scheduled = self.delayed.schedule_delayed(&lead, &plan.delayed);

        // Two independent settle-delay triggers: one for a successful
        // immediate pass, one as the fallback when no delayed work exists.
        // They can both fire for the same lead; aggregation is idempotent.
        if !successful.is_empty() {
            self.delayed.schedule_settle_aggregation(&lead.lead_id);
        }
        if scheduled == 0 {
            self.delayed.schedule_settle_aggregation(&lead.lead_id);
        }
    }
}

/// Error raised by the intake service.
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error("applicant consent is required before distribution")]
    ConsentRequired,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
