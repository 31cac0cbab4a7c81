use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::aggregate::OutcomeAggregator;
use super::dispatch::DispatchCoordinator;
use super::domain::{Lead, LeadId, LenderDirective};

pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Deferred-execution seam for delayed dispatch and settle-delay aggregation.
///
/// The production implementation keys timers to process lifetime: a task
/// scheduled but not yet fired is lost on restart. That non-durability is an
/// accepted property of the engine, not something implementations should
/// quietly paper over.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ScheduledTask);
}

/// In-process timer scheduler backed by the tokio runtime.
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }
}

/// Schedules each delayed directive independently and detects when all
/// delayed work for a lead has been attempted.
#[derive(Clone)]
pub struct DelayedScheduler {
    scheduler: Arc<dyn Scheduler>,
    coordinator: DispatchCoordinator,
    aggregator: OutcomeAggregator,
    settle_delay: Duration,
}

impl DelayedScheduler {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        coordinator: DispatchCoordinator,
        aggregator: OutcomeAggregator,
        settle_delay: Duration,
    ) -> Self {
        Self {
            scheduler,
            coordinator,
            aggregator,
            settle_delay,
        }
    }

    /// Schedule every non-self delayed directive for the lead. Returns how
    /// many tasks were scheduled so the caller can fall back to the
    /// settle-delay aggregation path when there are none.
    ///
    /// A per-lead countdown starts at the scheduled count. Each deferred task
    /// decrements it exactly once after its dispatch attempt finishes:
    /// `dispatch_one` is infallible, so the decrement is unconditional
    /// straight-line code and the count can neither stall nor overshoot. The
    /// task that drains the countdown runs the aggregation pass.
    pub fn schedule_delayed(&self, lead: &Lead, directives: &[LenderDirective]) -> usize {
        let eligible: Vec<LenderDirective> = directives
            .iter()
            .filter(|directive| !directive.is_self_directed(&lead.source))
            .cloned()
            .collect();

        let remaining = Arc::new(AtomicUsize::new(eligible.len()));
        let scheduled = eligible.len();

        for directive in eligible {
            let delay =
                Duration::from_secs(u64::from(directive.delay_minutes.unwrap_or(0)) * 60);
            let coordinator = self.coordinator.clone();
            let aggregator = self.aggregator.clone();
            let lead = lead.clone();
            let remaining = Arc::clone(&remaining);

            self.scheduler.schedule(
                delay,
                Box::pin(async move {
                    coordinator.dispatch_one(&lead, directive.lender).await;
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        debug!(lead = %lead.lead_id, "delayed directives drained, aggregating");
                        aggregator.aggregate(&lead.lead_id);
                    }
                }),
            );
        }

        scheduled
    }

    /// Queue an aggregation pass after the settle delay, giving asynchronous
    /// per-lender log writes time to land.
    pub fn schedule_settle_aggregation(&self, lead_id: &LeadId) {
        let aggregator = self.aggregator.clone();
        let lead_id = lead_id.clone();
        self.scheduler.schedule(
            self.settle_delay,
            Box::pin(async move {
                aggregator.aggregate(&lead_id);
            }),
        );
    }
}
