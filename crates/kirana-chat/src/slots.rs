//! Slot registry: the static mapping from slot keys to question templates,
//! storage keys, and answer parsing.
//!
//! Registry lookups that fail are configuration errors and are surfaced at
//! registry-load time via [`SlotRegistry::validate_order`], never per turn.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use kirana_core::types::{SlotKey, SlotValue};

use crate::error::ChatError;

// =============================================================================
// Answer parsing patterns (compiled once, reused across calls)
// =============================================================================

static PRICE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:between\s+)?(?:₹|rs\.?\s*|inr\s*)?(\d+(?:\.\d+)?)\s*(?:and|to|-)\s*(?:₹|rs\.?\s*|inr\s*)?(\d+(?:\.\d+)?)",
    )
    .expect("Invalid price range regex")
});

static PRICE_MAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:under|below|within|less\s+than|at\s+most|max(?:imum)?|up\s*to)\s*(?:₹|rs\.?\s*|inr\s*)?(\d+(?:\.\d+)?)",
    )
    .expect("Invalid price max regex")
});

static PRICE_MIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:above|over|more\s+than|at\s+least|min(?:imum)?)\s*(?:₹|rs\.?\s*|inr\s*)?(\d+(?:\.\d+)?)",
    )
    .expect("Invalid price min regex")
});

static BARE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:₹|\b)(\d+(?:\.\d+)?)\b").expect("Invalid number regex"));

static TERM_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|&|\band\b|\bplus\b)\s*").expect("Invalid split regex"));

/// Parse a price expression ("under ₹200", "between 50 and 100", "₹80").
///
/// A bare number is read as a ceiling, which is what a budget answer means.
/// Returns an open price (both bounds `None`) when no number is present, so
/// "no budget" style answers fulfil the slot without constraining the search.
pub fn parse_price(text: &str) -> SlotValue {
    if let Some(caps) = PRICE_RANGE_RE.captures(text) {
        let a: f64 = caps[1].parse().unwrap_or(0.0);
        let b: f64 = caps[2].parse().unwrap_or(0.0);
        return SlotValue::Price {
            min: Some(a.min(b)),
            max: Some(a.max(b)),
        };
    }
    if let Some(caps) = PRICE_MAX_RE.captures(text) {
        return SlotValue::Price {
            min: None,
            max: caps[1].parse().ok(),
        };
    }
    if let Some(caps) = PRICE_MIN_RE.captures(text) {
        return SlotValue::Price {
            min: caps[1].parse().ok(),
            max: None,
        };
    }
    if let Some(caps) = BARE_NUMBER_RE.captures(text) {
        return SlotValue::Price {
            min: None,
            max: caps[1].parse().ok(),
        };
    }
    SlotValue::Price {
        min: None,
        max: None,
    }
}

/// Split free text into a deduplicated, lowercased term list.
pub fn parse_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for part in TERM_SPLIT_RE.split(text) {
        let term = part
            .trim()
            .trim_matches(|c: char| c == '.' || c == '!' || c == '?')
            .to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

// =============================================================================
// SlotRegistry
// =============================================================================

/// How a slot's raw answer text is parsed into a [`SlotValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// Single text value.
    Scalar,
    /// Deduplicated term list.
    TermList,
    /// Price bounds.
    Price,
}

/// Static description of one slot: storage key, value kind, question
/// template, and canned quick replies offered with the question.
#[derive(Clone, Debug)]
pub struct SlotSpec {
    pub key: SlotKey,
    pub kind: SlotKind,
    /// The clarifying question shown to the user.
    pub question: &'static str,
    /// Quick replies offered alongside the question.
    pub quick_replies: &'static [&'static str],
    /// Key under which the value is stored in the session slot map.
    pub storage_key: &'static str,
}

/// Registry of all slots the assistant can ask about. Pure data.
#[derive(Clone, Debug)]
pub struct SlotRegistry {
    specs: BTreeMap<SlotKey, SlotSpec>,
}

impl SlotRegistry {
    /// Build a registry from an explicit spec list.
    pub fn new(specs: Vec<SlotSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.key, s)).collect(),
        }
    }

    /// The standard registry covering every [`SlotKey`].
    pub fn standard() -> Self {
        let specs = [
            SlotSpec {
                key: SlotKey::Budget,
                kind: SlotKind::Price,
                question: "What budget do you have in mind?",
                quick_replies: &["Under ₹100", "₹100 to ₹300", "No budget"],
                storage_key: "budget",
            },
            SlotSpec {
                key: SlotKey::Dietary,
                kind: SlotKind::TermList,
                question: "Any dietary requirements I should keep in mind?",
                quick_replies: &["Vegan", "Gluten free", "Low sodium", "None"],
                storage_key: "dietary",
            },
            SlotSpec {
                key: SlotKey::Brand,
                kind: SlotKind::Scalar,
                question: "Do you prefer a particular brand?",
                quick_replies: &["No preference"],
                storage_key: "brand",
            },
            SlotSpec {
                key: SlotKey::Preferences,
                kind: SlotKind::TermList,
                question: "Anything else you're looking for - flavour, texture, scent?",
                quick_replies: &["Surprise me"],
                storage_key: "preferences",
            },
            SlotSpec {
                key: SlotKey::Category,
                kind: SlotKind::Scalar,
                question: "What kind of product are you looking for?",
                quick_replies: &[],
                storage_key: "category",
            },
        ];
        Self {
            specs: specs.into_iter().map(|s| (s.key, s)).collect(),
        }
    }

    /// Look up the full spec for a slot.
    pub fn spec_for(&self, key: SlotKey) -> Result<&SlotSpec, ChatError> {
        self.specs.get(&key).ok_or(ChatError::UnknownSlot(key))
    }

    /// The clarifying question for a slot.
    pub fn question_for(&self, key: SlotKey) -> Result<&'static str, ChatError> {
        Ok(self.spec_for(key)?.question)
    }

    /// Verify that every slot in a priority order is registered.
    ///
    /// Call at startup or when adopting a proposed slot list; a failure here
    /// is a configuration error, not a runtime condition.
    pub fn validate_order(&self, order: &[SlotKey]) -> Result<(), ChatError> {
        for key in order {
            if !self.specs.contains_key(key) {
                return Err(ChatError::UnknownSlot(*key));
            }
        }
        Ok(())
    }

    /// Parse a raw answer into the slot's typed value.
    pub fn parse_answer(&self, key: SlotKey, raw: &str) -> Result<SlotValue, ChatError> {
        let spec = self.spec_for(key)?;
        let value = match spec.kind {
            SlotKind::Scalar => SlotValue::Text(raw.trim().to_string()),
            SlotKind::TermList => SlotValue::Terms(parse_terms(raw)),
            SlotKind::Price => parse_price(raw),
        };
        Ok(value)
    }
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Tests
// =============================================================================
