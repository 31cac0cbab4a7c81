use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::domain::{Lead, LeadId, LeadSuccess, LenderId, LenderResult};
use super::registry::LenderRegistry;
use super::repository::{DownstreamTrigger, LeadRepository, LeadSuccessStore};

/// Folds every lender's outcome log for a lead into one success aggregate.
///
/// Reads are independent and unordered; the stores are written without any
/// cross-store transaction, so the result is eventually consistent. Running
/// a pass twice is safe: the upsert merges flags via logical OR and never
/// unsets one.
#[derive(Clone)]
pub struct OutcomeAggregator {
    leads: Arc<dyn LeadRepository>,
    registry: Arc<LenderRegistry>,
    successes: Arc<dyn LeadSuccessStore>,
    trigger: Arc<dyn DownstreamTrigger>,
}

impl OutcomeAggregator {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        registry: Arc<LenderRegistry>,
        successes: Arc<dyn LeadSuccessStore>,
        trigger: Arc<dyn DownstreamTrigger>,
    ) -> Self {
        Self {
            leads,
            registry,
            successes,
            trigger,
        }
    }

    /// Run one aggregation pass and return the lenders judged successful.
    pub fn aggregate(&self, lead_id: &LeadId) -> Vec<LenderId> {
        let lead = match self.leads.fetch(lead_id) {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                warn!(lead = %lead_id, "aggregation requested for unknown lead");
                return Vec::new();
            }
            Err(err) => {
                warn!(lead = %lead_id, error = %err, "lead store unreachable, skipping aggregation");
                return Vec::new();
            }
        };

        let mut successful = Vec::new();
        for (lender, entry) in self.registry.entries() {
            let Some(judge) = entry.predicate else {
                continue;
            };
            match entry.outcomes.find_by_lead_id(lead_id) {
                Ok(entries) => {
                    let accepted = entries.iter().any(|log| {
                        log.response_status
                            .map(|status_code| {
                                judge(&LenderResult {
                                    status_code,
                                    raw_body: log.response_body.clone(),
                                })
                            })
                            .unwrap_or(false)
                    });
                    if accepted {
                        successful.push(lender);
                    }
                }
                Err(err) => {
                    // one unreachable log store must not block the rest
                    warn!(lead = %lead_id, lender = %lender, error = %err, "outcome log unreachable, skipping lender");
                }
            }
        }

        self.upsert(&lead.lead_id, &lead, &successful);
        self.trigger.schedule_notification(lead_id, &successful);
        info!(lead = %lead_id, successful = successful.len(), "aggregation pass complete");
        successful
    }

    fn upsert(&self, lead_id: &LeadId, lead: &Lead, successful: &[LenderId]) {
        let seed = LeadSuccess::seeded(lead, successful);
        match self.successes.find_or_create(seed) {
            Ok((_, created)) => {
                if !created {
                    let mut flags = BTreeMap::new();
                    for lender in successful {
                        flags.insert(*lender, true);
                    }
                    if let Err(err) = self.successes.update_flags(lead_id, &flags) {
                        warn!(lead = %lead_id, error = %err, "could not merge success flags");
                    }
                }
            }
            Err(err) => {
                warn!(lead = %lead_id, error = %err, "could not upsert lead success record");
            }
        }
    }
}
