//! Assessment engine: the ASK-phase slot-filling dialog for one query.
//!
//! An assessment walks a fixed priority order of slots, recording user
//! answers until every slot is fulfilled. The original query is captured at
//! creation and is the only query later search steps may use.

use std::collections::{BTreeMap, BTreeSet};

use kirana_core::types::{Assessment, AssessmentPhase, Constraint, SlotKey};

use crate::error::ChatError;
use crate::slots::SlotRegistry;

/// Construct an assessment for a query and a proposed slot order.
///
/// Errors with [`ChatError::NoSlotsProposed`] when the order is empty (the
/// caller should skip assessment and search directly) and with
/// [`ChatError::UnknownSlot`] when the order names an unregistered slot.
pub fn begin(
    query: &str,
    proposed: &[SlotKey],
    registry: &SlotRegistry,
) -> Result<Assessment, ChatError> {
    if proposed.is_empty() {
        return Err(ChatError::NoSlotsProposed);
    }
    registry.validate_order(proposed)?;

    Ok(Assessment {
        original_query: query.to_string(),
        priority_order: proposed.to_vec(),
        fulfilled: BTreeSet::new(),
        user_provided: BTreeSet::new(),
        currently_asking: Some(proposed[0]),
        phase: AssessmentPhase::Asking,
    })
}

/// Record a user answer for a slot.
///
/// Parses the raw text via the registry, stores a user-provenance constraint
/// into `slots`, and marks the slot fulfilled. Idempotent on re-answer: the
/// value is overwritten and the fulfilled/user-provided sets are unchanged
/// (they are sets). Only clears `currently_asking` when the answered slot is
/// the one being asked, so re-answering an earlier slot leaves the pending
/// question in place.
///
/// Calling this with no active question is a caller error and fails loudly:
/// a silent no-op here is exactly the lost-answer defect this engine exists
/// to prevent.
pub fn record_answer(
    assessment: &mut Assessment,
    slots: &mut BTreeMap<SlotKey, Constraint>,
    registry: &SlotRegistry,
    key: SlotKey,
    raw_answer: &str,
) -> Result<(), ChatError> {
    if assessment.phase != AssessmentPhase::Asking {
        return Err(ChatError::AssessmentComplete);
    }
    if assessment.currently_asking.is_none() {
        return Err(ChatError::NoActiveQuestion);
    }

    let value = registry.parse_answer(key, raw_answer)?;
    slots.insert(key, Constraint::user(key, value));
    assessment.fulfilled.insert(key);
    assessment.user_provided.insert(key);

    if assessment.currently_asking == Some(key) {
        assessment.currently_asking = None;
    }
    Ok(())
}

/// The first slot in the priority order not yet fulfilled, if any.
pub fn next_slot(assessment: &Assessment) -> Option<SlotKey> {
    assessment
        .priority_order
        .iter()
        .copied()
        .find(|key| !assessment.fulfilled.contains(key))
}

/// True when every slot in the priority order is fulfilled.
pub fn is_complete(assessment: &Assessment) -> bool {
    assessment
        .priority_order
        .iter()
        .all(|key| assessment.fulfilled.contains(key))
}

/// Advance the dialog: either flip to `Complete` (returning `None`) or set
/// and return the next slot to ask.
pub fn advance(assessment: &mut Assessment) -> Option<SlotKey> {
    match next_slot(assessment) {
        Some(key) => {
            assessment.currently_asking = Some(key);
            Some(key)
        }
        None => {
            assessment.phase = AssessmentPhase::Complete;
            assessment.currently_asking = None;
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
