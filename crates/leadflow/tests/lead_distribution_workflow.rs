//! Integration specifications for the lead distribution and outcome
//! aggregation workflow.
//!
//! Scenarios run end-to-end through the public service facade: intake,
//! immediate fan-out, delayed dispatch, and the aggregation passes that feed
//! the downstream notification trigger, without reaching into private
//! modules.

mod common {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use leadflow::distribution::{
        AdapterError, BulkCreateOutcome, DistributionPlan, DownstreamTrigger, Lead, LeadId,
        LeadRepository, LeadSubmission, LeadSuccess, LeadSuccessStore, LenderAdapter, LenderId,
        LenderResult, OutcomeLogEntry, OutcomeLogStore, RepositoryError, RowFailure, RuleStore,
        RuleStoreError,
    };

    pub fn submission(source: &str, phone: &str) -> LeadSubmission {
        LeadSubmission {
            source: source.to_string(),
            full_name: "Sipho Mahlangu".to_string(),
            phone: phone.to_string(),
            national_id: format!("nid-{phone}"),
            email: Some("sipho@example.net".to_string()),
            employer: Some("Karoo Logistics".to_string()),
            gross_monthly_income: Some(21_000),
            consent: true,
        }
    }

    pub struct ScriptedAdapter {
        response: Result<LenderResult, String>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        pub fn respond(status_code: u16, raw_body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(LenderResult {
                    status_code,
                    raw_body: raw_body.to_string(),
                }),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
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

    #[derive(Default)]
    pub struct MemoryLeadRepository {
        records: Mutex<HashMap<LeadId, Lead>>,
    }

    impl MemoryLeadRepository {
        pub fn fetch_by_phone(&self, phone: &str) -> Option<Lead> {
            let guard = self.records.lock().expect("lead store mutex poisoned");
            guard.values().find(|lead| lead.phone == phone).cloned()
        }
    }

    impl LeadRepository for MemoryLeadRepository {
        fn create(&self, lead: Lead) -> Result<Lead, RepositoryError> {
            let mut guard = self.records.lock().expect("lead store mutex poisoned");
            let duplicate = guard.values().any(|existing| {
                existing.phone == lead.phone || existing.national_id == lead.national_id
            });
            if duplicate {
                return Err(RepositoryError::DuplicateIdentity);
            }
            guard.insert(lead.lead_id.clone(), lead.clone());
            Ok(lead)
        }

        fn bulk_create(&self, leads: Vec<Lead>) -> Result<BulkCreateOutcome, RepositoryError> {
            let mut outcome = BulkCreateOutcome::default();
            for lead in leads {
                match self.create(lead) {
                    Ok(created) => outcome.created.push(created),
                    Err(err) => outcome.failures.push(RowFailure {
                        reference: "row".to_string(),
                        reason: err.to_string(),
                    }),
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

    #[derive(Default)]
    pub struct MemoryOutcomeLog {
        entries: Mutex<Vec<OutcomeLogEntry>>,
    }

    impl OutcomeLogStore for MemoryOutcomeLog {
        fn create(&self, entry: OutcomeLogEntry) -> Result<(), RepositoryError> {
            self.entries
                .lock()
                .expect("outcome log mutex poisoned")
                .push(entry);
            Ok(())
        }

        fn find_by_lead_id(
            &self,
            lead_id: &LeadId,
        ) -> Result<Vec<OutcomeLogEntry>, RepositoryError> {
            let guard = self.entries.lock().expect("outcome log mutex poisoned");
            Ok(guard
                .iter()
                .filter(|entry| &entry.lead_id == lead_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemoryLeadSuccessStore {
        records: Mutex<HashMap<LeadId, LeadSuccess>>,
    }

    impl MemoryLeadSuccessStore {
        pub fn snapshot(&self, lead_id: &LeadId) -> Option<LeadSuccess> {
            let guard = self.records.lock().expect("success store mutex poisoned");
            guard.get(lead_id).cloned()
        }
    }

    impl LeadSuccessStore for MemoryLeadSuccessStore {
        fn find_or_create(
            &self,
            seed: LeadSuccess,
        ) -> Result<(LeadSuccess, bool), RepositoryError> {
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
            flags: &std::collections::BTreeMap<LenderId, bool>,
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

    #[derive(Default)]
    pub struct RecordingTrigger {
        notifications: Mutex<Vec<(LeadId, Vec<LenderId>)>>,
    }

    impl RecordingTrigger {
        pub fn notifications(&self) -> Vec<(LeadId, Vec<LenderId>)> {
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

    pub struct StaticRuleStore {
        pub plan: DistributionPlan,
    }

    impl RuleStore for StaticRuleStore {
        fn find_active_rules(
            &self,
            _source: &str,
        ) -> Result<Option<DistributionPlan>, RuleStoreError> {
            Ok(Some(self.plan.clone()))
        }
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use leadflow::config::DistributionConfig;
use leadflow::distribution::{
    DelayedScheduler, DispatchCoordinator, DistributionPlan, LeadDistributionService,
    LenderAdapter, LenderDirective, LenderId, LenderRegistry, OutcomeAggregator, OutcomeLogStore,
    RuleResolver, TokioScheduler,
};

use common::{
    submission, MemoryLeadRepository, MemoryLeadSuccessStore, MemoryOutcomeLog, RecordingTrigger,
    ScriptedAdapter, StaticRuleStore,
};

struct Stack {
    leads: Arc<MemoryLeadRepository>,
    successes: Arc<MemoryLeadSuccessStore>,
    trigger: Arc<RecordingTrigger>,
    service: LeadDistributionService,
    settle_delay: Duration,
}

fn build_stack(
    adapters: BTreeMap<LenderId, Arc<ScriptedAdapter>>,
    plan: DistributionPlan,
) -> Stack {
    let config = DistributionConfig::default();

    let mut builder = LenderRegistry::builder();
    for (lender, adapter) in &adapters {
        builder = builder.register(
            *lender,
            adapter.clone() as Arc<dyn LenderAdapter>,
            Arc::new(MemoryOutcomeLog::default()) as Arc<dyn OutcomeLogStore>,
        );
    }
    let registry = Arc::new(builder.build());

    let leads = Arc::new(MemoryLeadRepository::default());
    let successes = Arc::new(MemoryLeadSuccessStore::default());
    let trigger = Arc::new(RecordingTrigger::default());

    let coordinator =
        DispatchCoordinator::new(registry.clone(), leads.clone(), config.worker_width);
    let aggregator = OutcomeAggregator::new(
        leads.clone(),
        registry,
        successes.clone(),
        trigger.clone(),
    );
    let delayed = DelayedScheduler::new(
        Arc::new(TokioScheduler),
        coordinator.clone(),
        aggregator,
        config.settle_delay,
    );
    let service = LeadDistributionService::new(
        leads.clone(),
        RuleResolver::new(Arc::new(StaticRuleStore { plan })),
        coordinator,
        delayed,
    );

    Stack {
        leads,
        successes,
        trigger,
        service,
        settle_delay: config.settle_delay,
    }
}

async fn drain_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn sml_lead_flows_through_immediate_and_delayed_dispatch() {
    let mut adapters = BTreeMap::new();
    adapters.insert(
        LenderId::LoanStar,
        ScriptedAdapter::respond(200, "DECISION=APPROVED"),
    );
    adapters.insert(LenderId::CreditNest, ScriptedAdapter::failing("boom"));
    adapters.insert(LenderId::FastFunds, ScriptedAdapter::respond(201, ""));
    let loanstar = adapters[&LenderId::LoanStar].clone();
    let creditnest = adapters[&LenderId::CreditNest].clone();
    let fastfunds = adapters[&LenderId::FastFunds].clone();

    let stack = build_stack(
        adapters,
        DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::LoanStar),
                LenderDirective::immediate(LenderId::CreditNest),
            ],
            delayed: vec![LenderDirective::delayed(LenderId::FastFunds, 60)],
        },
    );

    // intake succeeds even though one immediate adapter will throw
    let lead = stack
        .service
        .submit(submission("sml", "+27824440001"))
        .expect("lead created");

    drain_tasks().await;
    assert_eq!(loanstar.calls(), 1);
    assert_eq!(creditnest.calls(), 1, "the throwing sibling is still attempted");

    let stored = stack
        .leads
        .fetch_by_phone("+27824440001")
        .expect("lead persisted");
    assert_eq!(
        stored.immediate_successful_lenders,
        vec![LenderId::LoanStar],
        "only the accepting lender is recorded"
    );

    // the settle-delay aggregation pass fires first
    tokio::time::sleep(stack.settle_delay + Duration::from_secs(1)).await;
    drain_tasks().await;
    let after_settle = stack.trigger.notifications();
    assert_eq!(after_settle.len(), 1);
    assert_eq!(after_settle[0].1, vec![LenderId::LoanStar]);
    assert_eq!(fastfunds.calls(), 0, "delayed dispatch has not fired yet");

    // sixty minutes later the delayed directive fires exactly once and a
    // second aggregation pass follows its single completion
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    drain_tasks().await;

    assert_eq!(fastfunds.calls(), 1);
    let notifications = stack.trigger.notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(
        notifications[1].1,
        vec![LenderId::LoanStar, LenderId::FastFunds]
    );

    let success = stack.successes.snapshot(&lead.lead_id).expect("aggregated");
    assert_eq!(success.lender_flags.get(&LenderId::LoanStar), Some(&true));
    assert_eq!(success.lender_flags.get(&LenderId::FastFunds), Some(&true));
    assert_eq!(success.lender_flags.get(&LenderId::CreditNest), None);
}

#[tokio::test(start_paused = true)]
async fn duplicate_identity_is_surfaced_to_the_intake_caller() {
    let mut adapters = BTreeMap::new();
    adapters.insert(
        LenderId::LoanStar,
        ScriptedAdapter::respond(200, "DECISION=REFERRED"),
    );
    let stack = build_stack(
        adapters,
        DistributionPlan {
            immediate: vec![LenderDirective::immediate(LenderId::LoanStar)],
            delayed: Vec::new(),
        },
    );

    stack
        .service
        .submit(submission("sml", "+27824440002"))
        .expect("first lead created");

    let error = stack
        .service
        .submit(submission("sml", "+27824440002"))
        .expect_err("duplicate rejected");
    assert!(error.to_string().contains("already exists"));
}
