use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::domain::{Lead, LeadId, LenderDirective, LenderId, OutcomeLogEntry};
use super::registry::LenderRegistry;
use super::repository::LeadRepository;

/// Executes the immediate half of a distribution plan against the lender
/// registry with bounded concurrency.
///
/// Every directive runs to completion independently: an adapter failure is
/// caught, logged, and counted as a non-success without touching any sibling
/// dispatch. No retries, no per-call timeout; a hung lender call occupies
/// one pool lane until it returns.
#[derive(Clone)]
pub struct DispatchCoordinator {
    registry: Arc<LenderRegistry>,
    leads: Arc<dyn LeadRepository>,
    pool: Arc<Semaphore>,
}

impl DispatchCoordinator {
    pub fn new(
        registry: Arc<LenderRegistry>,
        leads: Arc<dyn LeadRepository>,
        worker_width: usize,
    ) -> Self {
        Self {
            registry,
            leads,
            pool: Arc::new(Semaphore::new(worker_width.max(1))),
        }
    }

    /// Fan a lead out to every non-self immediate directive and return the
    /// lenders whose responses passed their acceptance predicate.
    pub async fn dispatch_immediate(
        &self,
        lead: &Lead,
        directives: &[LenderDirective],
    ) -> Vec<LenderId> {
        let mut tasks = JoinSet::new();
        for directive in directives {
            if directive.is_self_directed(&lead.source) {
                debug!(lead = %lead.lead_id, lender = %directive.lender, "skipping self-directed dispatch");
                continue;
            }
            let coordinator = self.clone();
            let lead = lead.clone();
            let lender = directive.lender;
            tasks.spawn(async move {
                let accepted = coordinator.dispatch_one(&lead, lender).await;
                (lender, accepted)
            });
        }

        let mut successful = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((lender, true)) => successful.push(lender),
                Ok((_, false)) => {}
                Err(err) => warn!(lead = %lead.lead_id, error = %err, "dispatch task aborted"),
            }
        }
        successful.sort();
        successful
    }

    /// Dispatch one directive to one lender: adapter call, outcome-log append,
    /// acceptance predicate. Infallible by construction so callers can treat
    /// the return value as the complete story of the attempt.
    pub async fn dispatch_one(&self, lead: &Lead, lender: LenderId) -> bool {
        let Some(entry) = self.registry.resolve(lender) else {
            error!(
                lead = %lead.lead_id,
                lender = %lender,
                "directive names a lender with no registered adapter"
            );
            return false;
        };

        let _permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(lead = %lead.lead_id, lender = %lender, "dispatch pool closed");
                return false;
            }
        };

        let payload = dispatch_payload(lead);
        let outcome = entry.adapter.send(lead).await;

        let log_entry = match &outcome {
            Ok(result) => OutcomeLogEntry::new(
                lead,
                payload,
                Some(result.status_code),
                result.raw_body.clone(),
            ),
            Err(err) => OutcomeLogEntry::new(lead, payload, None, err.to_string()),
        };
        if let Err(err) = entry.outcomes.create(log_entry) {
            warn!(lead = %lead.lead_id, lender = %lender, error = %err, "outcome log write failed");
        }

        match outcome {
            Ok(result) => {
                let accepted = entry.predicate.map(|judge| judge(&result)).unwrap_or(false);
                if !accepted {
                    debug!(
                        lead = %lead.lead_id,
                        lender = %lender,
                        status = result.status_code,
                        "lender response did not pass acceptance predicate"
                    );
                }
                accepted
            }
            Err(err) => {
                warn!(lead = %lead.lead_id, lender = %lender, error = %err, "lender call failed");
                false
            }
        }
    }

    /// Persist the immediate fan-out result onto the lead. Best-effort: a
    /// store failure is logged and dispatch is still considered done.
    pub fn record_immediate_successes(&self, lead_id: &LeadId, successful: &[LenderId]) {
        if successful.is_empty() {
            return;
        }
        if let Err(err) = self
            .leads
            .set_immediate_successful_lenders(lead_id, successful)
        {
            warn!(lead = %lead_id, error = %err, "could not persist immediate successes");
        }
    }
}

fn dispatch_payload(lead: &Lead) -> serde_json::Value {
    json!({
        "lead_id": lead.lead_id,
        "source": lead.source,
        "full_name": lead.full_name,
        "phone": lead.phone,
        "national_id": lead.national_id,
        "email": lead.email,
        "employer": lead.employer,
        "gross_monthly_income": lead.gross_monthly_income,
        "consent": lead.consent,
    })
}
