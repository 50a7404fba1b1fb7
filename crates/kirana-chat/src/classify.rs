//! Classification adapter.
//!
//! Defines the classification contract the orchestrator consumes, plus a
//! regex-based fallback classifier for running without an LLM-backed
//! implementation. Follow-up detection is an explicit classification output,
//! not string matching in the orchestrator; the keyword heuristics below are
//! the documented fallback, used only when no richer classifier is wired in.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use kirana_core::types::{Domain, SessionSnapshot, SlotKey};

use crate::error::ChatError;

// =============================================================================
// Contract
// =============================================================================

/// Top-level routing decision for a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// A product-seeking query.
    Product,
    /// Orders, refunds, delivery and other support topics.
    Support,
    /// Greetings and small talk.
    General,
}

/// How the turn's data should be sourced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStrategy {
    /// No product data needed.
    None,
    /// Query the product index.
    FreshSearch,
    /// Answer from stored conversation/product state.
    MemoryOnly,
}

/// Structured classification of one user turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub route: Route,
    pub data_strategy: DataStrategy,
    pub domain: Domain,
    /// Category path derived for the query, when one could be established.
    pub category: Option<String>,
    /// Clarifying slots to ask, in priority order.
    pub proposed_slots: Vec<SlotKey>,
    /// Canned reply for non-product routes.
    pub simple_reply: Option<String>,
    /// True when this turn refines the existing anchor search.
    pub is_follow_up: bool,
}

/// The external classification capability.
///
/// Must be called with a read-only snapshot and must not have side effects
/// on the session.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        query: &str,
        ctx: &SessionSnapshot,
    ) -> Result<Classification, ChatError>;
}

// =============================================================================
// Compiled pattern sets (compiled once, reused across calls)
// =============================================================================

struct RoutePatterns {
    support: Vec<Regex>,
    greeting: Vec<Regex>,
}

static ROUTE_PATTERNS: LazyLock<RoutePatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid route regex"))
            .collect()
    };

    RoutePatterns {
        // Support patterns (checked first so "cancel my order" beats search).
        support: mk(&[
            r"(?i)\brefund\b",
            r"(?i)\border\s+status\b",
            r"(?i)\btrack(?:ing)?\b",
            r"(?i)\bdeliver(?:y|ed)\b",
            r"(?i)\bcancel\b",
            r"(?i)\bcomplain(?:t)?\b",
            r"(?i)\breturn\s+(?:my|the|this)\b",
        ]),
        greeting: mk(&[
            r"(?i)^\s*(?:hi|hii+|hello|hey|namaste)\b",
            r"(?i)\bthank(?:s| you)\b",
            r"(?i)^\s*(?:bye|goodbye)\b",
            r"(?i)\bhow\s+are\s+you\b",
        ]),
    }
});

// Memory references: the user points back at already-shown items.
static MEMORY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\btell\s+me\s+more\b",
        r"(?i)\bmore\s+about\b",
        r"(?i)\bwhich\s+(?:one|of\s+(?:these|those))\b",
        r"(?i)\bcompare\b",
        r"(?i)\bthe\s+(?:first|second|third|last)\s+one\b",
        r"(?i)\b(?:those|these)\s+(?:ones|products|items)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid memory regex"))
    .collect()
});

// Follow-up deltas: a bare refinement with no product noun of its own.
static FOLLOW_UP_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(?:under|below|above|over|within|less\s+than|at\s+most)\s*(?:₹|rs\.?\s*|inr\s*)?\d",
        r"(?i)\bcheaper\b",
        r"(?i)\bcostlier\b",
        r"(?i)^\s*what\s+about\b",
        r"(?i)\b(?:vegan|gluten\s+free|low\s+sodium|sugar\s+free)\s+ones\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid follow-up regex"))
    .collect()
});

static PRICE_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:₹|\brs\.?\s*\d|\binr\b|\bunder\b|\bbelow\b|\bbudget\b|\bcheap)")
        .expect("Invalid price mention regex")
});

static DIETARY_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:vegan|vegetarian|gluten|sodium|sugar\s+free|organic|keto)\b")
        .expect("Invalid dietary mention regex")
});

static QUERY_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:i\s+(?:want|need)|show\s+me|find\s+me|find|get\s+me|looking\s+for|want|need|suggest|recommend)\s+",
    )
    .expect("Invalid query prefix regex")
});

static PRICE_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*(?:under|below|above|over|within|less\s+than)\s*(?:₹|rs\.?\s*|inr\s*)?\d+(?:\.\d+)?\s*",
    )
    .expect("Invalid price tail regex")
});

static PERSONAL_CARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:shampoo|conditioner|soap|skincare|skin|face\s*wash|hair|lotion|cream|serum|toothpaste|deodorant|sunscreen)\b",
    )
    .expect("Invalid personal care regex")
});

static F_AND_B_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:chips|snack|snacks|pasta|chocolate|juice|tea|coffee|biscuit|cookies|noodles|milk|bread|cereal|drink|chikki|namkeen)\b",
    )
    .expect("Invalid f&b regex")
});

// =============================================================================
// HeuristicClassifier
// =============================================================================

/// Regex fallback classifier.
///
/// Good enough to drive the state machine without an LLM, and the reference
/// behavior the orchestrator tests run against. Richer deployments replace
/// this with an LLM-backed [`Classifier`].
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn derive_category(query: &str) -> Option<String> {
        let stripped = QUERY_PREFIX_RE.replace(query, "");
        let stripped = PRICE_TAIL_RE.replace_all(&stripped, " ");
        let category = stripped
            .trim()
            .trim_matches(|c: char| c == '?' || c == '!' || c == '.')
            .to_lowercase();
        if category.is_empty() {
            None
        } else {
            Some(category)
        }
    }

    fn derive_domain(query: &str) -> Domain {
        if PERSONAL_CARE_RE.is_match(query) {
            Domain::PersonalCare
        } else if F_AND_B_RE.is_match(query) {
            Domain::FAndB
        } else {
            Domain::Unknown
        }
    }

    fn propose_slots(query: &str, ctx: &SessionSnapshot, domain: Domain) -> Vec<SlotKey> {
        let mut slots = Vec::new();
        if !PRICE_MENTION_RE.is_match(query) && !ctx.slots.contains_key(&SlotKey::Budget) {
            slots.push(SlotKey::Budget);
        }
        if domain == Domain::FAndB
            && !DIETARY_MENTION_RE.is_match(query)
            && !ctx.slots.contains_key(&SlotKey::Dietary)
        {
            slots.push(SlotKey::Dietary);
        }
        slots
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(
        &self,
        query: &str,
        ctx: &SessionSnapshot,
    ) -> Result<Classification, ChatError> {
        // Non-product routes first.
        if ROUTE_PATTERNS.support.iter().any(|re| re.is_match(query)) {
            return Ok(Classification {
                route: Route::Support,
                data_strategy: DataStrategy::None,
                domain: ctx.domain,
                category: None,
                proposed_slots: vec![],
                simple_reply: Some(
                    "I can help with orders, refunds and delivery - our support team \
                     will take it from here."
                        .to_string(),
                ),
                is_follow_up: false,
            });
        }
        if ROUTE_PATTERNS.greeting.iter().any(|re| re.is_match(query)) {
            return Ok(Classification {
                route: Route::General,
                data_strategy: DataStrategy::None,
                domain: ctx.domain,
                category: None,
                proposed_slots: vec![],
                simple_reply: Some("Hello! Tell me what you're shopping for today.".to_string()),
                is_follow_up: false,
            });
        }

        let has_anchor = ctx.last_recommendation.is_some();

        // References to already-shown items.
        if has_anchor && MEMORY_RES.iter().any(|re| re.is_match(query)) {
            return Ok(Classification {
                route: Route::Product,
                data_strategy: DataStrategy::MemoryOnly,
                domain: ctx.domain,
                category: ctx.category.clone(),
                proposed_slots: vec![],
                simple_reply: None,
                is_follow_up: false,
            });
        }

        // Bare refinements of the existing anchor.
        if has_anchor && FOLLOW_UP_RES.iter().any(|re| re.is_match(query)) {
            return Ok(Classification {
                route: Route::Product,
                data_strategy: DataStrategy::FreshSearch,
                domain: ctx.domain,
                category: ctx.category.clone(),
                proposed_slots: vec![],
                simple_reply: None,
                is_follow_up: true,
            });
        }

        // A fresh product query.
        let domain = match Self::derive_domain(query) {
            Domain::Unknown => ctx.domain,
            found => found,
        };
        let proposed_slots = Self::propose_slots(query, ctx, domain);
        Ok(Classification {
            route: Route::Product,
            data_strategy: DataStrategy::FreshSearch,
            domain,
            category: Self::derive_category(query),
            proposed_slots,
            simple_reply: None,
            is_follow_up: false,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
