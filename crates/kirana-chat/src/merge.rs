//! Constraint merge engine.
//!
//! Decides, for each constraint coming back from parameter extraction,
//! whether to adopt it, union it with the existing session value, or keep
//! the existing value. Two rules are absolute here and not overridable by
//! any classification output:
//!
//! - a change of anchor category clears every category-scoped slot before
//!   any merge runs (cross-product pollution is the worst defect class this
//!   system has);
//! - a value the user explicitly provided is never silently dropped by a
//!   system-suggested one.

use std::collections::BTreeMap;

use tracing::debug;

use kirana_core::types::{
    Constraint, ExtractedConstraint, Provenance, Session, SlotKey, SlotValue, Strength,
};

/// Did the anchor category change between the session and an incoming query?
///
/// A session without an anchor has nothing to protect; an anchored session
/// treats an unknown incoming category as changed, since keeping stale
/// constraints is worse than re-asking.
pub fn scope_changed(current: Option<&str>, incoming: Option<&str>) -> bool {
    match (current, incoming) {
        (Some(cur), Some(new)) => !cur.eq_ignore_ascii_case(new),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Remove every category-scoped slot from the session.
///
/// All slots are scoped to the anchor category; only the session-level
/// domain survives a category switch. Runs before any merge when a
/// non-follow-up query changes the anchor.
pub fn clear_category_scope(session: &mut Session) {
    for key in SlotKey::ALL {
        session.slots.remove(&key);
    }
}

fn provenance_of(strength: Strength) -> Provenance {
    match strength {
        Strength::Hard => Provenance::User,
        Strength::Soft => Provenance::Suggested,
    }
}

/// Set union preserving first-seen order, case-insensitive on terms.
fn union_terms(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for term in incoming {
        if !merged.iter().any(|t| t.eq_ignore_ascii_case(term)) {
            merged.push(term.clone());
        }
    }
    merged
}

/// Merge one incoming constraint against the session's existing value.
///
/// Returns the constraint to store, or `None` when there is nothing to store
/// (no existing value and an empty incoming one).
///
/// - Empty incoming values carry no information and preserve the existing
///   value.
/// - A user-provided list value union-merges with the incoming list; the
///   user's terms are never dropped.
/// - A user-provided scalar is only overwritten by a hard (restated this
///   turn) incoming value; soft suggestions lose to it.
/// - A suggested existing value is simply replaced.
pub fn merge_constraint(
    existing: Option<&Constraint>,
    incoming: &ExtractedConstraint,
) -> Option<Constraint> {
    if incoming.value.is_empty() {
        return existing.cloned();
    }

    let existing = match existing {
        Some(c) => c,
        None => {
            return Some(Constraint {
                key: incoming.key,
                value: incoming.value.clone(),
                provenance: provenance_of(incoming.strength),
            });
        }
    };

    if existing.provenance == Provenance::User {
        // Protect the user's value.
        if let (SlotValue::Terms(have), SlotValue::Terms(new)) =
            (&existing.value, &incoming.value)
        {
            return Some(Constraint {
                key: incoming.key,
                value: SlotValue::Terms(union_terms(have, new)),
                provenance: Provenance::User,
            });
        }
        return match incoming.strength {
            Strength::Hard => Some(Constraint {
                key: incoming.key,
                value: incoming.value.clone(),
                provenance: Provenance::User,
            }),
            Strength::Soft => Some(existing.clone()),
        };
    }

    // Existing value was only a suggestion; incoming replaces it.
    Some(Constraint {
        key: incoming.key,
        value: incoming.value.clone(),
        provenance: provenance_of(incoming.strength),
    })
}

/// Resolve intra-turn conflicts: at most one incoming constraint per key.
///
/// Hard beats soft for the same key; equal-strength lists union; otherwise
/// the later extraction wins. Constraints for different keys are all kept.
fn dedupe_incoming(extracted: &[ExtractedConstraint]) -> BTreeMap<SlotKey, ExtractedConstraint> {
    let mut by_key: BTreeMap<SlotKey, ExtractedConstraint> = BTreeMap::new();
    for inc in extracted {
        match by_key.get_mut(&inc.key) {
            None => {
                by_key.insert(inc.key, inc.clone());
            }
            Some(held) => {
                if held.strength == inc.strength {
                    let unioned = match (&held.value, &inc.value) {
                        (SlotValue::Terms(a), SlotValue::Terms(b)) => {
                            Some(SlotValue::Terms(union_terms(a, b)))
                        }
                        _ => None,
                    };
                    held.value = unioned.unwrap_or_else(|| inc.value.clone());
                } else if inc.strength == Strength::Hard {
                    *held = inc.clone();
                }
                // A soft value never displaces a held hard one.
            }
        }
    }
    by_key
}

/// Apply a full turn's extracted constraints to the session.
///
/// Follow-up deltas refine the existing anchor: the category slot is never
/// re-derived from the delta text, so "under ₹50" after a chips search stays
/// a chips search.
pub fn apply_extracted(session: &mut Session, extracted: &[ExtractedConstraint], follow_up: bool) {
    let mut incoming = dedupe_incoming(extracted);
    if follow_up {
        incoming.remove(&SlotKey::Category);
    }

    for (key, inc) in incoming {
        let merged = merge_constraint(session.slots.get(&key), &inc);
        match merged {
            Some(constraint) => {
                debug!(slot = ?key, provenance = ?constraint.provenance, "Slot merged");
                session.slots.insert(key, constraint);
            }
            None => {
                // No existing value and an empty incoming one.
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
