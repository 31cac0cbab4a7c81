use std::sync::Arc;

use tracing::warn;

use super::domain::{DistributionPlan, LenderDirective, LenderId};

/// External store of per-source distribution rules.
pub trait RuleStore: Send + Sync {
    fn find_active_rules(&self, source: &str)
        -> Result<Option<DistributionPlan>, RuleStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a partner source into a distribution plan.
///
/// A rule-store outage or an inactive rule set degrades to the built-in
/// default table rather than blocking ingestion; the caller never sees the
/// failure. Self-exclusion is applied at dispatch time, not here, so the
/// same plan shape stays reusable independent of which lead it is applied to.
#[derive(Clone)]
pub struct RuleResolver {
    store: Arc<dyn RuleStore>,
}

impl RuleResolver {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, source: &str) -> DistributionPlan {
        match self.store.find_active_rules(source) {
            Ok(Some(plan)) => return plan,
            Ok(None) => {}
            Err(err) => {
                warn!(source, error = %err, "rule store lookup failed, falling back to defaults");
            }
        }
        default_plan_for(source)
    }
}

/// Built-in fallback table keyed by source, with a generic plan for sources
/// that carry no entry of their own.
pub(crate) fn default_plan_for(source: &str) -> DistributionPlan {
    match source.trim().to_ascii_lowercase().as_str() {
        "sml" => DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::LoanStar),
                LenderDirective::immediate(LenderId::CreditNest),
            ],
            delayed: vec![LenderDirective::delayed(LenderId::FastFunds, 60)],
        },
        "loanstar" => DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::Sml),
                LenderDirective::immediate(LenderId::FastFunds),
            ],
            delayed: vec![LenderDirective::delayed(LenderId::CreditNest, 30)],
        },
        "meridian" => DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::Sml),
                LenderDirective::immediate(LenderId::LoanStar),
            ],
            delayed: vec![
                LenderDirective::delayed(LenderId::CreditNest, 30),
                LenderDirective::delayed(LenderId::FastFunds, 120),
            ],
        },
        _ => DistributionPlan {
            immediate: vec![
                LenderDirective::immediate(LenderId::Sml),
                LenderDirective::immediate(LenderId::LoanStar),
                LenderDirective::immediate(LenderId::CreditNest),
            ],
            delayed: vec![LenderDirective::delayed(LenderId::FastFunds, 45)],
        },
    }
}

/// Rule store that never holds an active rule set; deployments relying purely
/// on the built-in defaults wire this in.
pub struct NoActiveRuleStore;

impl RuleStore for NoActiveRuleStore {
    fn find_active_rules(
        &self,
        _source: &str,
    ) -> Result<Option<DistributionPlan>, RuleStoreError> {
        Ok(None)
    }
}
