use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Product domain a conversation is anchored in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Food and beverage (snacks, groceries, drinks).
    FAndB,
    /// Personal care (hair oil, skincare, hygiene).
    PersonalCare,
    /// Domain not yet established for this session.
    #[default]
    Unknown,
}

/// A named constraint dimension the assistant may need filled before searching.
///
/// Every slot is scoped to the product category being discussed: a change of
/// anchor category invalidates all of them. The session-level `domain` is the
/// only conversational attribute that survives a category switch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    /// Price ceiling/floor for the search.
    Budget,
    /// Dietary requirements (vegan, low sodium, gluten free, ...).
    Dietary,
    /// Preferred brand.
    Brand,
    /// Free-form preferences (flavour, texture, scent, ...).
    Preferences,
    /// Category path of the anchor product ("snacks/chips").
    Category,
}

impl SlotKey {
    /// All slot keys, in canonical order.
    pub const ALL: [SlotKey; 5] = [
        SlotKey::Budget,
        SlotKey::Dietary,
        SlotKey::Brand,
        SlotKey::Preferences,
        SlotKey::Category,
    ];
}

/// Where a stored constraint value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The user explicitly answered a question or stated the value.
    User,
    /// The system inferred or suggested the value.
    Suggested,
}

/// Whether an extracted constraint must match or merely influences ranking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// Must-match filter taken from the current utterance.
    Hard,
    /// Ranking preference or recalled default.
    Soft,
}

/// Content classification of a stored conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnType {
    /// The bot answer carried product data.
    Product,
    /// Small talk or a general reply.
    Casual,
    /// A support/policy reply.
    Support,
}

/// Where the data behind a bot answer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// A fresh query against the product index.
    FreshSearch,
    /// Answered from stored conversation/product state only.
    MemoryOnly,
    /// No product data involved.
    None,
}

/// Lifecycle phase of an in-progress clarification dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentPhase {
    /// Still collecting slot answers.
    Asking,
    /// Every slot in the priority order is fulfilled.
    Complete,
}

// =============================================================================
// Constraint values
// =============================================================================

/// The typed value held by a slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotValue {
    /// Single scalar value (brand name, category path).
    Text(String),
    /// Deduplicated list of terms (dietary requirements, preferences).
    Terms(Vec<String>),
    /// Price bounds in the shop currency. Either bound may be open.
    Price {
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl SlotValue {
    /// True when the value carries no information (empty text/list, open
    /// price on both ends). Empty incoming values are treated as "no
    /// information" by the merge engine and never clear an existing value.
    pub fn is_empty(&self) -> bool {
        match self {
            SlotValue::Text(s) => s.trim().is_empty(),
            SlotValue::Terms(terms) => terms.is_empty(),
            SlotValue::Price { min, max } => min.is_none() && max.is_none(),
        }
    }

    /// Borrow the term list, if this is a list value.
    pub fn as_terms(&self) -> Option<&[String]> {
        match self {
            SlotValue::Terms(terms) => Some(terms),
            _ => None,
        }
    }

    /// Borrow the text, if this is a scalar text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SlotValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A stored constraint: value plus the provenance that decides how future
/// merges treat it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: SlotKey,
    pub value: SlotValue,
    pub provenance: Provenance,
}

impl Constraint {
    /// Build a user-provided constraint.
    pub fn user(key: SlotKey, value: SlotValue) -> Self {
        Self {
            key,
            value,
            provenance: Provenance::User,
        }
    }

    /// Build a system-suggested constraint.
    pub fn suggested(key: SlotKey, value: SlotValue) -> Self {
        Self {
            key,
            value,
            provenance: Provenance::Suggested,
        }
    }
}

/// A constraint as returned by the parameter-extraction capability, before
/// the merge engine has decided how it combines with session state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedConstraint {
    pub key: SlotKey,
    pub value: SlotValue,
    pub strength: Strength,
}

// =============================================================================
// Products
// =============================================================================

/// A product as returned by the search capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Stable identifier in the product index.
    pub id: String,
    pub name: String,
    pub brand: String,
    /// Price in the shop currency.
    pub price: f64,
    /// Average rating, 0.0 to 5.0.
    pub rating: f64,
    /// Flattened nutrient/attribute breakdown (per-100g values etc.).
    pub attributes: BTreeMap<String, f64>,
}

/// Immutable per-turn capture of a recommended product.
///
/// Created only when a search produced results; read by the memory
/// formatter; never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: f64,
    pub rating: f64,
    pub attributes: BTreeMap<String, f64>,
}

impl ProductSnapshot {
    /// Capture a snapshot of a returned product.
    pub fn capture(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            brand: product.brand.clone(),
            price: product.price,
            rating: product.rating,
            attributes: product.attributes.clone(),
        }
    }
}

/// The last set of recommended products, kept for memory-only answers and
/// follow-up detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The anchor query that produced these products.
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub products: Vec<ProductSnapshot>,
}

impl Recommendation {
    /// Capture up to `max_products` snapshots from a search result set.
    pub fn capture(query: &str, products: &[Product], max_products: usize) -> Self {
        Self {
            query: query.to_string(),
            timestamp: Utc::now(),
            products: products
                .iter()
                .take(max_products)
                .map(ProductSnapshot::capture)
                .collect(),
        }
    }
}

// =============================================================================
// Conversation turns
// =============================================================================

/// One stored conversation turn: the user utterance and a summary of the
/// bot's reply, tagged with content type and data source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub user_text: String,
    pub bot_summary: String,
    pub turn_type: TurnType,
    pub data_source: DataSource,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Build a turn stamped with the current time.
    pub fn new(
        user_text: &str,
        bot_summary: &str,
        turn_type: TurnType,
        data_source: DataSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_text: user_text.to_string(),
            bot_summary: bot_summary.to_string(),
            turn_type,
            data_source,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Assessment
// =============================================================================

/// One in-progress clarification dialog.
///
/// `original_query` is immutable for the assessment's lifetime; once the
/// assessment completes, the search is parameterized on it, never on the
/// text of the final clarifying answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub original_query: String,
    pub priority_order: Vec<SlotKey>,
    pub fulfilled: BTreeSet<SlotKey>,
    /// Subset of `fulfilled` whose value came from an explicit user answer.
    pub user_provided: BTreeSet<SlotKey>,
    pub currently_asking: Option<SlotKey>,
    pub phase: AssessmentPhase,
}

// =============================================================================
// Session
// =============================================================================

/// One conversation's full state, keyed by (user_id, session_id).
///
/// The session is read once at turn start, mutated in memory, and written
/// back at most once at turn end by the orchestrator. No other component
/// touches the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub session_id: String,
    /// Fulfilled constraint values, keyed by slot.
    #[serde(default)]
    pub slots: BTreeMap<SlotKey, Constraint>,
    /// Present only while mid-clarification.
    #[serde(default)]
    pub assessment: Option<Assessment>,
    /// Bounded recent-turn window, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub last_recommendation: Option<Recommendation>,
    #[serde(default)]
    pub domain: Domain,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session with no state.
    pub fn new(user_id: &str, session_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            slots: BTreeMap::new(),
            assessment: None,
            history: Vec::new(),
            last_recommendation: None,
            domain: Domain::Unknown,
            updated_at: Utc::now(),
        }
    }

    /// The category path currently anchoring this conversation, if any.
    pub fn category_path(&self) -> Option<&str> {
        self.slots
            .get(&SlotKey::Category)
            .and_then(|c| c.value.as_text())
    }

    /// True when the slot's stored value came from an explicit user answer.
    pub fn user_provided(&self, key: SlotKey) -> bool {
        self.slots
            .get(&key)
            .map(|c| c.provenance == Provenance::User)
            .unwrap_or(false)
    }

    /// Append a turn, trimming the window to `max_history` entries.
    pub fn push_turn(&mut self, turn: Turn, max_history: usize) {
        self.history.push(turn);
        while self.history.len() > max_history {
            self.history.remove(0);
        }
    }

    /// Build a read-only snapshot for capability calls.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            slots: self.slots.clone(),
            domain: self.domain,
            category: self.category_path().map(str::to_string),
            recent_turns: self.history.clone(),
            last_recommendation: self.last_recommendation.clone(),
        }
    }
}

/// Read-only view of a session handed to external capabilities.
///
/// Capabilities must not have side effects on the session; they only ever
/// see this copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub slots: BTreeMap<SlotKey, Constraint>,
    pub domain: Domain,
    pub category: Option<String>,
    pub recent_turns: Vec<Turn>,
    pub last_recommendation: Option<Recommendation>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_product(id: &str, price: f64) -> Product {
        let mut attributes = BTreeMap::new();
        attributes.insert("protein_g".to_string(), 7.5);
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            brand: "Acme".to_string(),
            price,
            rating: 4.2,
            attributes,
        }
    }

    // ---- Serde round trips ----

    #[test]
    fn test_domain_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Domain::FAndB).unwrap(),
            "\"f_and_b\""
        );
        assert_eq!(
            serde_json::to_string(&Domain::PersonalCare).unwrap(),
            "\"personal_care\""
        );
    }

    #[test]
    fn test_slot_key_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SlotKey::Budget).unwrap(), "\"budget\"");
        assert_eq!(
            serde_json::to_string(&SlotKey::Preferences).unwrap(),
            "\"preferences\""
        );
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let mut session = Session::new("u1", "s1");
        session.slots.insert(
            SlotKey::Dietary,
            Constraint::user(SlotKey::Dietary, SlotValue::Terms(vec!["vegan".into()])),
        );
        session.domain = Domain::FAndB;
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn test_session_deserializes_with_missing_optional_fields() {
        // Older blobs may lack newer fields; serde defaults must cover them.
        let json = r#"{"user_id":"u1","session_id":"s1","updated_at":"2026-01-01T00:00:00Z"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.slots.is_empty());
        assert!(session.assessment.is_none());
        assert_eq!(session.domain, Domain::Unknown);
    }

    // ---- SlotValue::is_empty ----

    #[test]
    fn test_empty_text_is_empty() {
        assert!(SlotValue::Text("  ".into()).is_empty());
        assert!(!SlotValue::Text("Lays".into()).is_empty());
    }

    #[test]
    fn test_empty_terms_is_empty() {
        assert!(SlotValue::Terms(vec![]).is_empty());
        assert!(!SlotValue::Terms(vec!["vegan".into()]).is_empty());
    }

    #[test]
    fn test_open_price_is_empty() {
        assert!(SlotValue::Price {
            min: None,
            max: None
        }
        .is_empty());
        assert!(!SlotValue::Price {
            min: None,
            max: Some(50.0)
        }
        .is_empty());
    }

    // ---- Session helpers ----

    #[test]
    fn test_category_path_reads_category_slot() {
        let mut session = Session::new("u1", "s1");
        assert!(session.category_path().is_none());
        session.slots.insert(
            SlotKey::Category,
            Constraint::suggested(SlotKey::Category, SlotValue::Text("snacks/chips".into())),
        );
        assert_eq!(session.category_path(), Some("snacks/chips"));
    }

    #[test]
    fn test_user_provided_reflects_provenance() {
        let mut session = Session::new("u1", "s1");
        session.slots.insert(
            SlotKey::Dietary,
            Constraint::user(SlotKey::Dietary, SlotValue::Terms(vec!["vegan".into()])),
        );
        session.slots.insert(
            SlotKey::Budget,
            Constraint::suggested(
                SlotKey::Budget,
                SlotValue::Price {
                    min: None,
                    max: Some(200.0),
                },
            ),
        );
        assert!(session.user_provided(SlotKey::Dietary));
        assert!(!session.user_provided(SlotKey::Budget));
        assert!(!session.user_provided(SlotKey::Brand));
    }

    #[test]
    fn test_push_turn_trims_window() {
        let mut session = Session::new("u1", "s1");
        for i in 0..7 {
            session.push_turn(
                Turn::new(
                    &format!("query {}", i),
                    "reply",
                    TurnType::Casual,
                    DataSource::None,
                ),
                5,
            );
        }
        assert_eq!(session.history.len(), 5);
        assert_eq!(session.history[0].user_text, "query 2");
        assert_eq!(session.history[4].user_text, "query 6");
    }

    #[test]
    fn test_snapshot_copies_state() {
        let mut session = Session::new("u1", "s1");
        session.domain = Domain::PersonalCare;
        session.slots.insert(
            SlotKey::Category,
            Constraint::suggested(SlotKey::Category, SlotValue::Text("hair/oil".into())),
        );
        let snap = session.snapshot();
        assert_eq!(snap.domain, Domain::PersonalCare);
        assert_eq!(snap.category.as_deref(), Some("hair/oil"));
        // Mutating the snapshot must not touch the session.
        let mut snap = snap;
        snap.slots.clear();
        assert_eq!(session.slots.len(), 1);
    }

    // ---- Recommendation capture ----

    #[test]
    fn test_recommendation_capture_limits_products() {
        let products: Vec<Product> = (0..12)
            .map(|i| snapshot_product(&format!("p{}", i), 10.0 + i as f64))
            .collect();
        let rec = Recommendation::capture("chips", &products, 8);
        assert_eq!(rec.products.len(), 8);
        assert_eq!(rec.query, "chips");
        assert_eq!(rec.products[0].id, "p0");
    }

    #[test]
    fn test_recommendation_capture_empty() {
        let rec = Recommendation::capture("chips", &[], 8);
        assert!(rec.products.is_empty());
    }

    #[test]
    fn test_product_snapshot_copies_attributes() {
        let product = snapshot_product("p1", 49.0);
        let snap = ProductSnapshot::capture(&product);
        assert_eq!(snap.id, "p1");
        assert_eq!(snap.attributes.get("protein_g"), Some(&7.5));
    }
}
