//! Memory formatter: bounded, tagged representation of recent history and
//! the last recommendation, plus the eligibility check for the
//! answer-from-memory path.
//!
//! The output format is consumed by an LLM-style capability, so every field
//! is always present (an explicit `has_products=false` rather than an
//! omitted block) and numeric attributes are spelled out in full.

use kirana_core::types::{Recommendation, Session, Turn, TurnType};

use crate::capabilities::Answer;
use crate::classify::Route;

/// Classify a produced answer into a stored turn type.
///
/// An answer that carried product data is a product turn regardless of
/// route; otherwise the route decides.
pub fn classify_turn_type(answer: &Answer, route: Route) -> TurnType {
    if !answer.product_ids_ordered.is_empty() {
        TurnType::Product
    } else if route == Route::Support {
        TurnType::Support
    } else {
        TurnType::Casual
    }
}

/// Memory-only answering is possible only when the last recommendation
/// exists and actually contains products.
pub fn is_eligible(session: &Session) -> bool {
    session
        .last_recommendation
        .as_ref()
        .map(|rec| !rec.products.is_empty())
        .unwrap_or(false)
}

/// Serialize the last `max_turns` turns plus the last recommendation into
/// tagged key/value blocks.
///
/// Truncation keeps the most recent turns and drops older ones whole; a
/// turn is never partially serialized.
pub fn format_for_answering(
    history: &[Turn],
    last_recommendation: Option<&Recommendation>,
    max_turns: usize,
) -> String {
    let start = history.len().saturating_sub(max_turns);
    let window = &history[start..];

    let mut out = String::new();
    out.push_str(&format!("[conversation turns={}]\n", window.len()));
    for (i, turn) in window.iter().enumerate() {
        out.push_str(&format!(
            "[turn n={} type={} source={} time={}]\n",
            i + 1,
            tag(turn.turn_type),
            source_tag(turn),
            turn.timestamp.to_rfc3339(),
        ));
        out.push_str(&format!("user: {}\n", turn.user_text));
        out.push_str(&format!("bot: {}\n", turn.bot_summary));
        out.push_str("[/turn]\n");
    }
    out.push_str("[/conversation]\n");

    match last_recommendation {
        Some(rec) if !rec.products.is_empty() => {
            out.push_str(&format!(
                "[products has_products=true count={} query=\"{}\"]\n",
                rec.products.len(),
                rec.query,
            ));
            for product in &rec.products {
                out.push_str(&format!(
                    "[product id={} name=\"{}\" brand=\"{}\" price={:.2} rating={:.1}]\n",
                    product.id, product.name, product.brand, product.price, product.rating,
                ));
                for (attr, value) in &product.attributes {
                    out.push_str(&format!("{}={}\n", attr, value));
                }
                out.push_str("[/product]\n");
            }
            out.push_str("[/products]\n");
        }
        _ => {
            out.push_str("[products has_products=false count=0 query=\"\"]\n[/products]\n");
        }
    }

    out
}

fn tag(turn_type: TurnType) -> &'static str {
    match turn_type {
        TurnType::Product => "product",
        TurnType::Casual => "casual",
        TurnType::Support => "support",
    }
}

fn source_tag(turn: &Turn) -> &'static str {
    use kirana_core::types::DataSource;
    match turn.data_source {
        DataSource::FreshSearch => "fresh_search",
        DataSource::MemoryOnly => "memory_only",
        DataSource::None => "none",
    }
}

// =============================================================================
// Tests
// =============================================================================
