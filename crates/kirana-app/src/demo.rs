//! Demo capability implementations.
//!
//! Stand-ins for the LLM-backed extraction/answering services and the
//! product index, good enough to drive the full conversation loop from a
//! terminal: a keyword extractor, a small built-in catalog, and a template
//! answer generator.

use async_trait::async_trait;
use std::collections::BTreeMap;

use kirana_chat::capabilities::{
    Answer, AnswerGenerator, ParamExtractor, ProductSearch, SearchRequest,
};
use kirana_chat::error::ChatError;
use kirana_chat::slots;
use kirana_core::types::{
    ExtractedConstraint, Product, SessionSnapshot, SlotKey, SlotValue, Strength,
};

// =============================================================================
// KeywordExtractor
// =============================================================================

const DIETARY_TERMS: &[&str] = &[
    "vegan",
    "vegetarian",
    "gluten free",
    "low sodium",
    "sugar free",
    "organic",
    "keto",
];

/// Keyword-based parameter extraction: price expressions and dietary terms
/// found verbatim in the utterance are hard constraints.
pub struct KeywordExtractor;

#[async_trait]
impl ParamExtractor for KeywordExtractor {
    async fn extract(
        &self,
        query: &str,
        _ctx: &SessionSnapshot,
        _follow_up: bool,
    ) -> Result<Vec<ExtractedConstraint>, ChatError> {
        let mut extracted = Vec::new();

        let price = slots::parse_price(query);
        if !price.is_empty() {
            extracted.push(ExtractedConstraint {
                key: SlotKey::Budget,
                value: price,
                strength: Strength::Hard,
            });
        }

        let lower = query.to_lowercase();
        let dietary: Vec<String> = DIETARY_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .map(|term| term.to_string())
            .collect();
        if !dietary.is_empty() {
            extracted.push(ExtractedConstraint {
                key: SlotKey::Dietary,
                value: SlotValue::Terms(dietary),
                strength: Strength::Hard,
            });
        }

        Ok(extracted)
    }
}

// =============================================================================
// CatalogSearch
// =============================================================================

struct CatalogEntry {
    product: Product,
    category: &'static str,
    tags: &'static [&'static str],
}

/// Product search over a small built-in catalog.
pub struct CatalogSearch {
    entries: Vec<CatalogEntry>,
}

impl CatalogSearch {
    pub fn with_builtin_catalog() -> Self {
        let mk = |id: &str,
                  name: &str,
                  brand: &str,
                  price: f64,
                  rating: f64,
                  attrs: &[(&str, f64)]| Product {
            id: id.to_string(),
            name: name.to_string(),
            brand: brand.to_string(),
            price,
            rating,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        };

        let entries = vec![
            CatalogEntry {
                product: mk(
                    "fnb-001",
                    "Baked Salted Chips",
                    "CrispCo",
                    30.0,
                    4.2,
                    &[("sodium_mg", 180.0), ("protein_g", 6.0)],
                ),
                category: "snacks/chips",
                tags: &["vegan", "low sodium"],
            },
            CatalogEntry {
                product: mk(
                    "fnb-002",
                    "Masala Potato Chips",
                    "Tango",
                    20.0,
                    4.0,
                    &[("sodium_mg", 420.0), ("protein_g", 5.0)],
                ),
                category: "snacks/chips",
                tags: &["vegetarian"],
            },
            CatalogEntry {
                product: mk(
                    "fnb-003",
                    "Quinoa Chips",
                    "GrainFul",
                    90.0,
                    4.5,
                    &[("sodium_mg", 150.0), ("protein_g", 9.0)],
                ),
                category: "snacks/chips",
                tags: &["vegan", "gluten free", "organic"],
            },
            CatalogEntry {
                product: mk(
                    "fnb-010",
                    "Durum Wheat Penne",
                    "CasaPasta",
                    85.0,
                    4.4,
                    &[("protein_g", 12.0), ("fibre_g", 3.5)],
                ),
                category: "pantry/pasta",
                tags: &["vegetarian"],
            },
            CatalogEntry {
                product: mk(
                    "fnb-011",
                    "Gluten Free Fusilli",
                    "CasaPasta",
                    140.0,
                    4.1,
                    &[("protein_g", 7.0), ("fibre_g", 4.0)],
                ),
                category: "pantry/pasta",
                tags: &["vegan", "gluten free"],
            },
            CatalogEntry {
                product: mk(
                    "fnb-020",
                    "Dark Chocolate 70%",
                    "KokoaWorks",
                    110.0,
                    4.6,
                    &[("sugar_g", 18.0), ("cocoa_pct", 70.0)],
                ),
                category: "snacks/chocolate",
                tags: &["vegetarian", "gluten free"],
            },
            CatalogEntry {
                product: mk(
                    "pc-001",
                    "Cold Pressed Coconut Hair Oil",
                    "VedaLeaf",
                    150.0,
                    4.3,
                    &[("volume_ml", 200.0)],
                ),
                category: "hair/oil",
                tags: &["organic"],
            },
            CatalogEntry {
                product: mk(
                    "pc-002",
                    "Onion Hair Oil",
                    "HerbNest",
                    190.0,
                    4.0,
                    &[("volume_ml", 150.0)],
                ),
                category: "hair/oil",
                tags: &[],
            },
            CatalogEntry {
                product: mk(
                    "pc-010",
                    "Mild Daily Shampoo",
                    "HerbNest",
                    220.0,
                    4.2,
                    &[("volume_ml", 340.0)],
                ),
                category: "hair/shampoo",
                tags: &[],
            },
        ];
        Self { entries }
    }

    fn matches_category(entry: &CatalogEntry, category: &str) -> bool {
        let haystack = format!(
            "{} {}",
            entry.category,
            entry.product.name.to_lowercase()
        );
        category
            .to_lowercase()
            .split_whitespace()
            .any(|word| haystack.contains(word))
    }

    fn matches_constraints(entry: &CatalogEntry, request: &SearchRequest) -> bool {
        for constraint in &request.constraints {
            match (constraint.key, &constraint.value) {
                (SlotKey::Budget, SlotValue::Price { min, max }) => {
                    if let Some(min) = min {
                        if entry.product.price < *min {
                            return false;
                        }
                    }
                    if let Some(max) = max {
                        if entry.product.price > *max {
                            return false;
                        }
                    }
                }
                (SlotKey::Dietary, SlotValue::Terms(terms)) => {
                    if !terms
                        .iter()
                        .all(|t| entry.tags.iter().any(|tag| tag.eq_ignore_ascii_case(t)))
                    {
                        return false;
                    }
                }
                (SlotKey::Brand, SlotValue::Text(brand)) => {
                    if !brand.trim().is_empty()
                        && !entry.product.brand.eq_ignore_ascii_case(brand.trim())
                    {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

#[async_trait]
impl ProductSearch for CatalogSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Product>, ChatError> {
        let mut hits: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|entry| match &request.category {
                Some(category) => Self::matches_category(entry, category),
                None => true,
            })
            .filter(|entry| Self::matches_constraints(entry, request))
            .collect();
        hits.sort_by(|a, b| {
            b.product
                .rating
                .partial_cmp(&a.product.rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits.into_iter().map(|e| e.product.clone()).collect())
    }
}

// =============================================================================
// TemplateAnswerer
// =============================================================================

/// Answer generation from fixed templates.
pub struct TemplateAnswerer;

#[async_trait]
impl AnswerGenerator for TemplateAnswerer {
    async fn generate(
        &self,
        query: &str,
        products: &[Product],
        _ctx: &SessionSnapshot,
    ) -> Result<Answer, ChatError> {
        if products.is_empty() {
            return Ok(Answer {
                summary_text: format!(
                    "I couldn't find anything matching \"{}\" - want to loosen a filter?",
                    query
                ),
                product_ids_ordered: vec![],
                quick_replies: vec![
                    "Remove the budget".to_string(),
                    "Start a new search".to_string(),
                ],
            });
        }

        let listing: Vec<String> = products
            .iter()
            .take(3)
            .map(|p| format!("{} by {} at ₹{:.0}", p.name, p.brand, p.price))
            .collect();
        Ok(Answer {
            summary_text: format!(
                "Here's what I found for \"{}\": {}.",
                query,
                listing.join("; ")
            ),
            product_ids_ordered: products.iter().map(|p| p.id.clone()).collect(),
            quick_replies: vec![
                "Tell me more about these".to_string(),
                "Show cheaper options".to_string(),
            ],
        })
    }

    async fn generate_from_memory(
        &self,
        _query: &str,
        _memory: &str,
        ctx: &SessionSnapshot,
    ) -> Result<Answer, ChatError> {
        let Some(rec) = ctx.last_recommendation.as_ref() else {
            return Ok(Answer {
                summary_text: "I haven't shown you anything yet - what are you looking for?"
                    .to_string(),
                product_ids_ordered: vec![],
                quick_replies: vec![],
            });
        };

        let listing: Vec<String> = rec
            .products
            .iter()
            .map(|p| {
                let attrs: Vec<String> = p
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{} {}", k, v))
                    .collect();
                format!(
                    "{} by {} at ₹{:.0}, rated {:.1} ({})",
                    p.name,
                    p.brand,
                    p.price,
                    p.rating,
                    attrs.join(", ")
                )
            })
            .collect();
        Ok(Answer {
            summary_text: format!(
                "From your \"{}\" search: {}.",
                rec.query,
                listing.join("; ")
            ),
            product_ids_ordered: rec.products.iter().map(|p| p.id.clone()).collect(),
            quick_replies: vec!["Show cheaper options".to_string()],
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
