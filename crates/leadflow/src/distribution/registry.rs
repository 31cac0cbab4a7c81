use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::domain::{Lead, LenderId, LenderResult};
use super::repository::OutcomeLogStore;

/// Outbound integration for one lending counterpart. Implementations shape
/// the payload, speak the lender's protocol, and normalize whatever comes
/// back into a [`LenderResult`] envelope.
#[async_trait]
pub trait LenderAdapter: Send + Sync {
    async fn send(&self, lead: &Lead) -> Result<LenderResult, AdapterError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("lender endpoint unreachable: {0}")]
    Transport(String),
    #[error("lender rejected the request: {0}")]
    Rejected(String),
}

/// Decides whether a normalized lender response counts as an acceptance.
pub type SuccessPredicate = fn(&LenderResult) -> bool;

/// Everything the engine holds per registered lender: the adapter, the
/// lender-specific acceptance predicate, and that lender's own outcome log.
pub struct RegisteredLender {
    pub adapter: Arc<dyn LenderAdapter>,
    pub predicate: Option<SuccessPredicate>,
    pub outcomes: Arc<dyn OutcomeLogStore>,
}

/// Static lender registry resolved once at startup.
///
/// Replaces the string-keyed handler maps of older revisions: directives are
/// typed [`LenderId`]s, and a directive naming a lender that was never
/// registered is a configuration error surfaced at dispatch time.
pub struct LenderRegistry {
    entries: BTreeMap<LenderId, RegisteredLender>,
}

impl LenderRegistry {
    pub fn builder() -> LenderRegistryBuilder {
        LenderRegistryBuilder {
            entries: BTreeMap::new(),
        }
    }

    pub fn resolve(&self, lender: LenderId) -> Option<&RegisteredLender> {
        self.entries.get(&lender)
    }

    pub fn lenders(&self) -> impl Iterator<Item = LenderId> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (LenderId, &RegisteredLender)> {
        self.entries.iter().map(|(lender, entry)| (*lender, entry))
    }

    pub fn is_registered(&self, lender: LenderId) -> bool {
        self.entries.contains_key(&lender)
    }
}

pub struct LenderRegistryBuilder {
    entries: BTreeMap<LenderId, RegisteredLender>,
}

impl LenderRegistryBuilder {
    /// Register a lender with its built-in acceptance predicate.
    pub fn register(
        mut self,
        lender: LenderId,
        adapter: Arc<dyn LenderAdapter>,
        outcomes: Arc<dyn OutcomeLogStore>,
    ) -> Self {
        self.entries.insert(
            lender,
            RegisteredLender {
                adapter,
                predicate: predicates::for_lender(lender),
                outcomes,
            },
        );
        self
    }

    /// Register a lender with an explicit predicate override; `None` means
    /// the lender is never judged successful.
    pub fn register_with_predicate(
        mut self,
        lender: LenderId,
        adapter: Arc<dyn LenderAdapter>,
        predicate: Option<SuccessPredicate>,
        outcomes: Arc<dyn OutcomeLogStore>,
    ) -> Self {
        self.entries.insert(
            lender,
            RegisteredLender {
                adapter,
                predicate,
                outcomes,
            },
        );
        self
    }

    pub fn build(self) -> LenderRegistry {
        LenderRegistry {
            entries: self.entries,
        }
    }
}

/// Per-lender acceptance interpretation, kept out of dispatch logic entirely.
/// Each counterpart signals acceptance differently; the envelope stays
/// uniform and the reading lives here.
pub(crate) mod predicates {
    use super::{LenderId, LenderResult, SuccessPredicate};

    pub(crate) fn for_lender(lender: LenderId) -> Option<SuccessPredicate> {
        match lender {
            LenderId::Sml => Some(sml),
            LenderId::LoanStar => Some(loanstar),
            LenderId::CreditNest => Some(creditnest),
            LenderId::FastFunds => Some(fastfunds),
            // Meridian acknowledges receipt only; acceptance arrives through
            // a channel this engine does not read, so no predicate exists.
            LenderId::Meridian => None,
        }
    }

    fn sml(result: &LenderResult) -> bool {
        result.status_code == 200 && result.raw_body.contains("\"status\":\"accepted\"")
    }

    fn loanstar(result: &LenderResult) -> bool {
        result.status_code == 200 && result.raw_body.contains("APPROVED")
    }

    fn creditnest(result: &LenderResult) -> bool {
        (200..300).contains(&result.status_code)
            && result.raw_body.contains("\"eligible\":true")
    }

    fn fastfunds(result: &LenderResult) -> bool {
        result.status_code == 201
    }
}
