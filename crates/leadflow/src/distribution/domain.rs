use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for ingested leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

static LEAD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl LeadId {
    pub fn generate() -> Self {
        let id = LEAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        LeadId(format!("lead-{id:06}"))
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Known lending counterparts a lead may be forwarded to.
///
/// Directives and rule data are parsed into this enum as soon as they enter
/// the system, so an unknown identifier is rejected up front instead of
/// surfacing as a silent no-op at dispatch time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum LenderId {
    #[serde(rename = "sml")]
    Sml,
    #[serde(rename = "loanstar")]
    LoanStar,
    #[serde(rename = "creditnest")]
    CreditNest,
    #[serde(rename = "fastfunds")]
    FastFunds,
    #[serde(rename = "meridian")]
    Meridian,
}

impl LenderId {
    pub const ALL: [LenderId; 5] = [
        LenderId::Sml,
        LenderId::LoanStar,
        LenderId::CreditNest,
        LenderId::FastFunds,
        LenderId::Meridian,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            LenderId::Sml => "sml",
            LenderId::LoanStar => "loanstar",
            LenderId::CreditNest => "creditnest",
            LenderId::FastFunds => "fastfunds",
            LenderId::Meridian => "meridian",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lender| lender.as_str() == normalized)
    }

    /// Whether this lender is the counterpart a source string refers to.
    /// Used for the self-exclusion rule: a lead is never sent back to the
    /// channel it came from.
    pub fn matches_source(self, source: &str) -> bool {
        source.trim().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for LenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hour-of-day window a rule may attach to a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

/// A single forwarding instruction inside a distribution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderDirective {
    pub lender: LenderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<u32>,
}

impl LenderDirective {
    pub fn immediate(lender: LenderId) -> Self {
        Self {
            lender,
            time_window: None,
            delay_minutes: None,
        }
    }

    pub fn delayed(lender: LenderId, delay_minutes: u32) -> Self {
        Self {
            lender,
            time_window: None,
            delay_minutes: Some(delay_minutes),
        }
    }

    /// A directive pointing back at the lead's own source channel.
    pub fn is_self_directed(&self, source: &str) -> bool {
        self.lender.matches_source(source)
    }
}

/// The immediate/delayed forwarding instructions resolved for one lead.
/// Derived from configuration per pass; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub immediate: Vec<LenderDirective>,
    pub delayed: Vec<LenderDirective>,
}

/// Creation request for a single lead, as submitted by a partner channel or
/// mapped from a bulk-file row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSubmission {
    pub source: String,
    pub full_name: String,
    pub phone: String,
    pub national_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub employer: Option<String>,
    #[serde(default)]
    pub gross_monthly_income: Option<u32>,
    pub consent: bool,
}

/// A stored loan-application lead.
///
/// Identity and application fields are immutable after creation. The single
/// mutable field, `immediate_successful_lenders`, is written exactly once by
/// the dispatch coordinator after the immediate fan-out completes. Leads are
/// never deleted by this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: LeadId,
    pub source: String,
    pub full_name: String,
    pub phone: String,
    pub national_id: String,
    pub email: Option<String>,
    pub employer: Option<String>,
    pub gross_monthly_income: u32,
    pub consent: bool,
    pub created_at: DateTime<Utc>,
    pub immediate_successful_lenders: Vec<LenderId>,
}

impl Lead {
    pub fn from_submission(submission: LeadSubmission) -> Self {
        Self {
            lead_id: LeadId::generate(),
            source: submission.source,
            full_name: submission.full_name,
            phone: submission.phone,
            national_id: submission.national_id,
            email: submission.email,
            employer: submission.employer,
            gross_monthly_income: submission.gross_monthly_income.unwrap_or(0),
            consent: submission.consent,
            created_at: Utc::now(),
            immediate_successful_lenders: Vec::new(),
        }
    }

    pub fn intake_view(&self) -> LeadIntakeView {
        LeadIntakeView {
            lead_id: self.lead_id.clone(),
            source: self.source.clone(),
            created_at: self.created_at,
        }
    }
}

/// Sanitized representation of an accepted lead for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct LeadIntakeView {
    pub lead_id: LeadId,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Normalized envelope for whatever a lender integration returns. The
/// per-lender interpretation lives entirely in the success-predicate
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LenderResult {
    pub status_code: u16,
    pub raw_body: String,
}

static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// One append-only record of a lender call, stored per lender with no
/// cross-store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeLogEntry {
    pub log_id: String,
    pub lead_id: LeadId,
    pub source: String,
    pub request_payload: serde_json::Value,
    pub response_status: Option<u16>,
    pub response_body: String,
    pub created_at: DateTime<Utc>,
}

impl OutcomeLogEntry {
    pub fn new(
        lead: &Lead,
        request_payload: serde_json::Value,
        response_status: Option<u16>,
        response_body: String,
    ) -> Self {
        let id = LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            log_id: format!("log-{id:06}"),
            lead_id: lead.lead_id.clone(),
            source: lead.source.clone(),
            request_payload,
            response_status,
            response_body,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate of lender acceptance per lead. Flags are monotonic: once a
/// lender's flag is true it is never reset to false by a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSuccess {
    pub lead_id: LeadId,
    pub source: String,
    pub full_name: String,
    pub phone: String,
    pub lender_flags: BTreeMap<LenderId, bool>,
}

impl LeadSuccess {
    pub fn seeded(lead: &Lead, successful: &[LenderId]) -> Self {
        let mut lender_flags = BTreeMap::new();
        for lender in successful {
            lender_flags.insert(*lender, true);
        }
        Self {
            lead_id: lead.lead_id.clone(),
            source: lead.source.clone(),
            full_name: lead.full_name.clone(),
            phone: lead.phone.clone(),
            lender_flags,
        }
    }

    pub fn successful_lenders(&self) -> Vec<LenderId> {
        self.lender_flags
            .iter()
            .filter(|(_, accepted)| **accepted)
            .map(|(lender, _)| *lender)
            .collect()
    }
}
