use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use leadflow::config::DistributionConfig;
use leadflow::distribution::{
    AdapterError, BulkCreateOutcome, BulkIngestionPipeline, CsvChunkParser, DelayedScheduler,
    DispatchCoordinator, DownstreamTrigger, InMemoryJobStore, Lead, LeadDistributionService,
    LeadId, LeadRepository, LeadSuccess, LeadSuccessStore, LenderAdapter, LenderId,
    LenderRegistry, LenderResult, OutcomeAggregator, OutcomeLogEntry, OutcomeLogStore,
    RepositoryError, RowFailure, RuleResolver, RuleStore, TokioScheduler,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Lead store keyed by id with phone/identity-number duplicate detection.
#[derive(Default, Clone)]
pub(crate) struct InMemoryLeadRepository {
    records: Arc<Mutex<HashMap<LeadId, Lead>>>,
}

impl InMemoryLeadRepository {
    fn is_duplicate(records: &HashMap<LeadId, Lead>, lead: &Lead) -> bool {
        records
            .values()
            .any(|existing| existing.phone == lead.phone || existing.national_id == lead.national_id)
    }
}

impl LeadRepository for InMemoryLeadRepository {
    fn create(&self, lead: Lead) -> Result<Lead, RepositoryError> {
        let mut guard = self.records.lock().expect("lead store mutex poisoned");
        if Self::is_duplicate(&guard, &lead) {
            return Err(RepositoryError::DuplicateIdentity);
        }
        guard.insert(lead.lead_id.clone(), lead.clone());
        Ok(lead)
    }

    fn bulk_create(&self, leads: Vec<Lead>) -> Result<BulkCreateOutcome, RepositoryError> {
        let mut guard = self.records.lock().expect("lead store mutex poisoned");
        let mut outcome = BulkCreateOutcome::default();
        for lead in leads {
            if Self::is_duplicate(&guard, &lead) {
                outcome.failures.push(RowFailure {
                    reference: lead.phone.clone(),
                    reason: RepositoryError::DuplicateIdentity.to_string(),
                });
            } else {
                guard.insert(lead.lead_id.clone(), lead.clone());
                outcome.created.push(lead);
            }
        }
        Ok(outcome)
    }

    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let guard = self.records.lock().expect("lead store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn set_immediate_successful_lenders(
        &self,
        id: &LeadId,
        lenders: &[LenderId],
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("lead store mutex poisoned");
        let lead = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        lead.immediate_successful_lenders = lenders.to_vec();
        Ok(())
    }
}

/// One append-only outcome log per lender.
#[derive(Default, Clone)]
pub(crate) struct InMemoryOutcomeLog {
    entries: Arc<Mutex<Vec<OutcomeLogEntry>>>,
}

impl OutcomeLogStore for InMemoryOutcomeLog {
    fn create(&self, entry: OutcomeLogEntry) -> Result<(), RepositoryError> {
        self.entries
            .lock()
            .expect("outcome log mutex poisoned")
            .push(entry);
        Ok(())
    }

    fn find_by_lead_id(&self, lead_id: &LeadId) -> Result<Vec<OutcomeLogEntry>, RepositoryError> {
        let guard = self.entries.lock().expect("outcome log mutex poisoned");
        Ok(guard
            .iter()
            .filter(|entry| &entry.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryLeadSuccessStore {
    records: Arc<Mutex<HashMap<LeadId, LeadSuccess>>>,
}

impl InMemoryLeadSuccessStore {
    pub(crate) fn snapshot(&self, lead_id: &LeadId) -> Option<LeadSuccess> {
        let guard = self.records.lock().expect("success store mutex poisoned");
        guard.get(lead_id).cloned()
    }
}

impl LeadSuccessStore for InMemoryLeadSuccessStore {
    fn find_or_create(&self, seed: LeadSuccess) -> Result<(LeadSuccess, bool), RepositoryError> {
        let mut guard = self.records.lock().expect("success store mutex poisoned");
        if let Some(existing) = guard.get(&seed.lead_id) {
            return Ok((existing.clone(), false));
        }
        guard.insert(seed.lead_id.clone(), seed.clone());
        Ok((seed, true))
    }

    fn update_flags(
        &self,
        lead_id: &LeadId,
        flags: &BTreeMap<LenderId, bool>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("success store mutex poisoned");
        let record = guard.get_mut(lead_id).ok_or(RepositoryError::NotFound)?;
        for (lender, accepted) in flags {
            if *accepted {
                record.lender_flags.insert(*lender, true);
            }
        }
        Ok(())
    }
}

/// Downstream trigger that records the hand-off in the service log; the real
/// messaging scheduler is an external collaborator.
#[derive(Default, Clone)]
pub(crate) struct LoggingTrigger;

impl DownstreamTrigger for LoggingTrigger {
    fn schedule_notification(&self, lead_id: &LeadId, successful: &[LenderId]) {
        let lenders: Vec<&str> = successful.iter().map(|lender| lender.as_str()).collect();
        info!(lead = %lead_id, ?lenders, "notification scheduled downstream");
    }
}

/// Stand-in lender integration for local runs: replays a canned, per-lender
/// response in the shape the real counterpart would produce.
pub(crate) struct SimulatedLenderAdapter {
    lender: LenderId,
}

impl SimulatedLenderAdapter {
    pub(crate) fn new(lender: LenderId) -> Arc<Self> {
        Arc::new(Self { lender })
    }
}

#[async_trait]
impl LenderAdapter for SimulatedLenderAdapter {
    async fn send(&self, lead: &Lead) -> Result<LenderResult, AdapterError> {
        match self.lender {
            LenderId::Sml => Ok(LenderResult {
                status_code: 200,
                raw_body: format!(
                    "{{\"status\":\"accepted\",\"reference\":\"sml-{}\"}}",
                    lead.lead_id
                ),
            }),
            LenderId::LoanStar => Ok(LenderResult {
                status_code: 200,
                raw_body: "DECISION=APPROVED".to_string(),
            }),
            LenderId::CreditNest => Ok(LenderResult {
                status_code: 200,
                raw_body: "{\"eligible\":false,\"reason\":\"score below cutoff\"}".to_string(),
            }),
            LenderId::FastFunds => Ok(LenderResult {
                status_code: 201,
                raw_body: String::new(),
            }),
            LenderId::Meridian => Ok(LenderResult {
                status_code: 200,
                raw_body: "received".to_string(),
            }),
        }
    }
}

/// The wired distribution engine shared by the server and the CLI demo.
pub(crate) struct Engine {
    pub(crate) service: Arc<LeadDistributionService>,
    pub(crate) pipeline: Arc<BulkIngestionPipeline>,
    pub(crate) jobs: Arc<InMemoryJobStore>,
    pub(crate) leads: Arc<InMemoryLeadRepository>,
    pub(crate) successes: Arc<InMemoryLeadSuccessStore>,
}

pub(crate) fn build_engine(
    distribution: &DistributionConfig,
    rules: Arc<dyn RuleStore>,
) -> Engine {
    let mut builder = LenderRegistry::builder();
    for lender in LenderId::ALL {
        builder = builder.register(
            lender,
            SimulatedLenderAdapter::new(lender) as Arc<dyn LenderAdapter>,
            Arc::new(InMemoryOutcomeLog::default()) as Arc<dyn OutcomeLogStore>,
        );
    }
    let registry = Arc::new(builder.build());

    let leads = Arc::new(InMemoryLeadRepository::default());
    let successes = Arc::new(InMemoryLeadSuccessStore::default());
    let jobs = Arc::new(InMemoryJobStore::default());

    let coordinator = DispatchCoordinator::new(
        registry.clone(),
        leads.clone() as Arc<dyn LeadRepository>,
        distribution.worker_width,
    );
    let aggregator = OutcomeAggregator::new(
        leads.clone() as Arc<dyn LeadRepository>,
        registry,
        successes.clone() as Arc<dyn LeadSuccessStore>,
        Arc::new(LoggingTrigger) as Arc<dyn DownstreamTrigger>,
    );
    let delayed = DelayedScheduler::new(
        Arc::new(TokioScheduler),
        coordinator.clone(),
        aggregator,
        distribution.settle_delay,
    );
    let service = LeadDistributionService::new(
        leads.clone() as Arc<dyn LeadRepository>,
        RuleResolver::new(rules),
        coordinator.clone(),
        delayed,
    );
    let pipeline = BulkIngestionPipeline::new(
        Arc::new(CsvChunkParser),
        leads.clone() as Arc<dyn LeadRepository>,
        coordinator,
        jobs.clone(),
        distribution.clone(),
    );

    Engine {
        service: Arc::new(service),
        pipeline: Arc::new(pipeline),
        jobs,
        leads,
        successes,
    }
}
