use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::DistributionConfig;
use crate::distribution::aggregate::OutcomeAggregator;
use crate::distribution::delayed::{DelayedScheduler, TokioScheduler};
use crate::distribution::dispatch::DispatchCoordinator;
use crate::distribution::domain::{
    DistributionPlan, Lead, LeadId, LeadSubmission, LeadSuccess, LenderId, LenderResult,
    OutcomeLogEntry,
};
use crate::distribution::registry::{AdapterError, LenderAdapter, LenderRegistry};
use crate::distribution::repository::{
    BulkCreateOutcome, DownstreamTrigger, LeadRepository, LeadSuccessStore, OutcomeLogStore,
    RepositoryError, RowFailure,
};
use crate::distribution::rules::{RuleStore, RuleStoreError};

pub(super) fn submission(source: &str, phone: &str) -> LeadSubmission {
    LeadSubmission {
        source: source.to_string(),
        full_name: "Thandi Nkosi".to_string(),
        phone: phone.to_string(),
        national_id: format!("id-{phone}"),
        email: Some("thandi@example.net".to_string()),
        employer: Some("Acme Mining".to_string()),
        gross_monthly_income: Some(18_500),
        consent: true,
    }
}

pub(super) fn lead(source: &str, phone: &str) -> Lead {
    Lead::from_submission(submission(source, phone))
}

/// Response body that passes the lender's built-in acceptance predicate.
pub(super) fn accepting_result(lender: LenderId) -> LenderResult {
    match lender {
        LenderId::Sml => LenderResult {
            status_code: 200,
            raw_body: "{\"status\":\"accepted\",\"reference\":\"sml-001\"}".to_string(),
        },
        LenderId::LoanStar => LenderResult {
            status_code: 200,
            raw_body: "DECISION=APPROVED".to_string(),
        },
        LenderId::CreditNest => LenderResult {
            status_code: 200,
            raw_body: "{\"eligible\":true}".to_string(),
        },
        LenderId::FastFunds => LenderResult {
            status_code: 201,
            raw_body: String::new(),
        },
        LenderId::Meridian => LenderResult {
            status_code: 200,
            raw_body: "received".to_string(),
        },
    }
}

pub(super) fn declining_result() -> LenderResult {
    LenderResult {
        status_code: 200,
        raw_body: "{\"status\":\"declined\"}".to_string(),
    }
}

/// Adapter that replays a scripted response and counts its invocations.
pub(super) struct ScriptedAdapter {
    response: Result<LenderResult, String>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub(super) fn accepting(lender: LenderId) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(accepting_result(lender)),
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn declining() -> Arc<Self> {
        Arc::new(Self {
            response: Ok(declining_result()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LenderAdapter for ScriptedAdapter {
    async fn send(&self, _lead: &Lead) -> Result<LenderResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(result) => Ok(result.clone()),
            Err(message) => Err(AdapterError::Transport(message.clone())),
        }
    }
}

/// In-memory lead store with phone/identity duplicate detection.
#[derive(Default)]
pub(super) struct MemoryLeadRepository {
    records: Mutex<HashMap<LeadId, Lead>>,
    bulk_create_sizes: Mutex<Vec<usize>>,
    set_immediate_calls: AtomicUsize,
}

impl MemoryLeadRepository {
    pub(super) fn bulk_create_sizes(&self) -> Vec<usize> {
        self.bulk_create_sizes
            .lock()
            .expect("lead store mutex poisoned")
            .clone()
    }

    pub(super) fn set_immediate_calls(&self) -> usize {
        self.set_immediate_calls.load(Ordering::SeqCst)
    }

    fn is_duplicate(records: &HashMap<LeadId, Lead>, lead: &Lead) -> bool {
        records
            .values()
            .any(|existing| existing.phone == lead.phone || existing.national_id == lead.national_id)
    }
}

impl LeadRepository for MemoryLeadRepository {
    fn create(&self, lead: Lead) -> Result<Lead, RepositoryError> {
        let mut guard = self.records.lock().expect("lead store mutex poisoned");
        if Self::is_duplicate(&guard, &lead) {
            return Err(RepositoryError::DuplicateIdentity);
        }
        guard.insert(lead.lead_id.clone(), lead.clone());
        Ok(lead)
    }

    fn bulk_create(&self, leads: Vec<Lead>) -> Result<BulkCreateOutcome, RepositoryError> {
        self.bulk_create_sizes
            .lock()
            .expect("lead store mutex poisoned")
            .push(leads.len());

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
        self.set_immediate_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.records.lock().expect("lead store mutex poisoned");
        let lead = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        lead.immediate_successful_lenders = lenders.to_vec();
        Ok(())
    }
}

/// Per-lender append-only outcome log.
#[derive(Default)]
pub(super) struct MemoryOutcomeLog {
    entries: Mutex<Vec<OutcomeLogEntry>>,
}

impl MemoryOutcomeLog {
    pub(super) fn entries(&self) -> Vec<OutcomeLogEntry> {
        self.entries.lock().expect("outcome log mutex poisoned").clone()
    }

    pub(super) fn clear(&self) {
        self.entries.lock().expect("outcome log mutex poisoned").clear();
    }
}

impl OutcomeLogStore for MemoryOutcomeLog {
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

/// Outcome log whose reads always fail, for isolation tests.
#[derive(Default)]
pub(super) struct UnreachableOutcomeLog;

impl OutcomeLogStore for UnreachableOutcomeLog {
    fn create(&self, _entry: OutcomeLogEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("log store down".to_string()))
    }

    fn find_by_lead_id(&self, _lead_id: &LeadId) -> Result<Vec<OutcomeLogEntry>, RepositoryError> {
        Err(RepositoryError::Unavailable("log store down".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryLeadSuccessStore {
    records: Mutex<HashMap<LeadId, LeadSuccess>>,
}

impl MemoryLeadSuccessStore {
    pub(super) fn snapshot(&self, lead_id: &LeadId) -> Option<LeadSuccess> {
        let guard = self.records.lock().expect("success store mutex poisoned");
        guard.get(lead_id).cloned()
    }
}

impl LeadSuccessStore for MemoryLeadSuccessStore {
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

/// Trigger that records every notification it is asked to schedule.
#[derive(Default)]
pub(super) struct RecordingTrigger {
    notifications: Mutex<Vec<(LeadId, Vec<LenderId>)>>,
}

impl RecordingTrigger {
    pub(super) fn notifications(&self) -> Vec<(LeadId, Vec<LenderId>)> {
        self.notifications
            .lock()
            .expect("trigger mutex poisoned")
            .clone()
    }
}

impl DownstreamTrigger for RecordingTrigger {
    fn schedule_notification(&self, lead_id: &LeadId, successful: &[LenderId]) {
        self.notifications
            .lock()
            .expect("trigger mutex poisoned")
            .push((lead_id.clone(), successful.to_vec()));
    }
}

pub(super) struct StaticRuleStore {
    pub(super) plan: Option<DistributionPlan>,
}

impl RuleStore for StaticRuleStore {
    fn find_active_rules(
        &self,
        _source: &str,
    ) -> Result<Option<DistributionPlan>, RuleStoreError> {
        Ok(self.plan.clone())
    }
}

pub(super) struct FailingRuleStore;

impl RuleStore for FailingRuleStore {
    fn find_active_rules(
        &self,
        _source: &str,
    ) -> Result<Option<DistributionPlan>, RuleStoreError> {
        Err(RuleStoreError::Unavailable("rule store offline".to_string()))
    }
}

/// Wires scripted adapters into a registry with one in-memory outcome log
/// per lender.
pub(super) fn scripted_registry(
    adapters: &BTreeMap<LenderId, Arc<ScriptedAdapter>>,
) -> (Arc<LenderRegistry>, BTreeMap<LenderId, Arc<MemoryOutcomeLog>>) {
    let mut logs = BTreeMap::new();
    let mut builder = LenderRegistry::builder();
    for (lender, adapter) in adapters {
        let log = Arc::new(MemoryOutcomeLog::default());
        builder = builder.register(
            *lender,
            adapter.clone() as Arc<dyn LenderAdapter>,
            log.clone() as Arc<dyn OutcomeLogStore>,
        );
        logs.insert(*lender, log);
    }
    (Arc::new(builder.build()), logs)
}

/// Full engine harness over in-memory stores and scripted adapters.
pub(super) struct Harness {
    pub(super) leads: Arc<MemoryLeadRepository>,
    pub(super) successes: Arc<MemoryLeadSuccessStore>,
    pub(super) trigger: Arc<RecordingTrigger>,
    pub(super) logs: BTreeMap<LenderId, Arc<MemoryOutcomeLog>>,
    pub(super) coordinator: DispatchCoordinator,
    pub(super) aggregator: OutcomeAggregator,
    pub(super) delayed: DelayedScheduler,
    pub(super) config: DistributionConfig,
}

pub(super) fn harness(
    adapters: BTreeMap<LenderId, Arc<ScriptedAdapter>>,
    config: DistributionConfig,
) -> Harness {
    let (registry, logs) = scripted_registry(&adapters);
    let leads = Arc::new(MemoryLeadRepository::default());
    let successes = Arc::new(MemoryLeadSuccessStore::default());
    let trigger = Arc::new(RecordingTrigger::default());

    let coordinator = DispatchCoordinator::new(
        registry.clone(),
        leads.clone() as Arc<dyn LeadRepository>,
        config.worker_width,
    );
    let aggregator = OutcomeAggregator::new(
        leads.clone() as Arc<dyn LeadRepository>,
        registry.clone(),
        successes.clone() as Arc<dyn LeadSuccessStore>,
        trigger.clone() as Arc<dyn DownstreamTrigger>,
    );
    let delayed = DelayedScheduler::new(
        Arc::new(TokioScheduler),
        coordinator.clone(),
        aggregator.clone(),
        config.settle_delay,
    );

    Harness {
        leads,
        successes,
        trigger,
        logs,
        coordinator,
        aggregator,
        delayed,
        config,
    }
}

/// Let spawned tasks run to completion without advancing the clock.
pub(super) async fn drain_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
