//! Conversation orchestrator: the single entry point for a turn.
//!
//! Decides the path for each turn (continue a clarification dialog, refine
//! the previous search, answer from memory, run a fresh search, or just
//! reply) and is the only component allowed to persist session state.
//!
//! Persistence discipline: the session is read once at turn start, mutated
//! on an in-memory copy, and saved exactly once after the full result is
//! assembled. A turn that fails (or is cancelled mid-flight) leaves the
//! stored session exactly as it was before the turn began.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kirana_core::config::{ChatConfig, SessionConfig};
use kirana_core::types::{
    AssessmentPhase, Constraint, DataSource, Domain, Product, Recommendation, Session, SlotKey,
    SlotValue, Turn, TurnType,
};
use kirana_store::SessionStore;

use crate::assessment;
use crate::capabilities::{Answer, AnswerGenerator, ParamExtractor, ProductSearch, SearchRequest};
use crate::classify::{Classification, Classifier, DataStrategy, Route};
use crate::error::ChatError;
use crate::memory;
use crate::merge;
use crate::slots::SlotRegistry;

/// The per-turn state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// A new product query that needs clarification.
    NewQuery,
    /// Consuming an answer to an open clarifying question.
    ContinuingAssessment,
    /// Refining the previous anchor search.
    FollowUp,
    /// Answering from stored conversation/product state.
    MemoryAnswer,
    /// Querying the product index.
    FreshSearch,
    /// Non-product reply, no product data involved.
    SimpleReply,
}

/// The response contract returned to the transport layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotResponse {
    pub text: String,
    pub quick_replies: Vec<String>,
    /// Product ids in presentation order, empty for non-product replies.
    pub product_ids: Vec<String>,
    pub state: TurnState,
}

/// Coordinates classification, slot filling, merging, search, and answer
/// generation for one session turn at a time.
pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn ParamExtractor>,
    search: Arc<dyn ProductSearch>,
    answerer: Arc<dyn AnswerGenerator>,
    registry: SlotRegistry,
    session_cfg: SessionConfig,
    chat_cfg: ChatConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        classifier: Arc<dyn Classifier>,
        extractor: Arc<dyn ParamExtractor>,
        search: Arc<dyn ProductSearch>,
        answerer: Arc<dyn AnswerGenerator>,
        registry: SlotRegistry,
        session_cfg: SessionConfig,
        chat_cfg: ChatConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            extractor,
            search,
            answerer,
            registry,
            session_cfg,
            chat_cfg,
        }
    }

    /// Handle one user turn for a session.
    ///
    /// Contract violations (empty/oversize message) surface as errors.
    /// External capability failures degrade to a generic fallback reply with
    /// no session write, so the user can retry cleanly.
    pub async fn handle_turn(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<BotResponse, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.len() > self.chat_cfg.max_message_length {
            return Err(ChatError::MessageTooLong(self.chat_cfg.max_message_length));
        }

        let mut session = self
            .store
            .get(user_id, session_id)
            .await?
            .unwrap_or_else(|| Session::new(user_id, session_id));

        match self.run_turn(&mut session, message).await {
            Ok(response) => {
                session.updated_at = Utc::now();
                self.store.save(&session).await?;
                info!(user_id, session_id, state = ?response.state, "Turn handled");
                Ok(response)
            }
            Err(err) if err.is_capability_failure() => {
                warn!(user_id, session_id, error = %err, "Capability failed, degrading");
                Ok(self.fallback_response())
            }
            Err(err) => Err(err),
        }
    }

    // -------------------------------------------------------------------------
    // Transition table
    // -------------------------------------------------------------------------

    async fn run_turn(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<BotResponse, ChatError> {
        // 1. An open clarifying question consumes the turn first.
        if session
            .assessment
            .as_ref()
            .map(|a| a.phase == AssessmentPhase::Asking)
            .unwrap_or(false)
        {
            return self.continue_assessment(session, message).await;
        }

        // 2. Classify the query in context.
        let classification = self
            .classifier
            .classify(message, &session.snapshot())
            .await?;
        debug!(
            route = ?classification.route,
            strategy = ?classification.data_strategy,
            follow_up = classification.is_follow_up,
            "Query classified"
        );

        if classification.route != Route::Product {
            return self.simple_reply(session, message, &classification);
        }

        // 3. A refinement of the existing anchor.
        if classification.is_follow_up && session.last_recommendation.is_some() {
            let anchor = session
                .last_recommendation
                .as_ref()
                .map(|rec| rec.query.clone())
                .unwrap_or_else(|| message.to_string());
            return self
                .run_search(session, message, message, &anchor, TurnState::FollowUp, true)
                .await;
        }

        // 4. Answer from memory when the classifier asks for it and the
        //    session actually has something to remember.
        if classification.data_strategy == DataStrategy::MemoryOnly {
            if memory::is_eligible(session) {
                return self.memory_answer(session, message).await;
            }
            debug!("Memory path ineligible, falling back to fresh search");
        }

        // New anchor: enforce category isolation before anything merges.
        self.rebase_scope(session, &classification);

        // 5. Clarify first when the classifier proposed slots that are not
        //    yet fulfilled.
        let proposed: Vec<SlotKey> = classification
            .proposed_slots
            .iter()
            .copied()
            .filter(|key| !session.slots.contains_key(key))
            .collect();
        if !proposed.is_empty() {
            return self.begin_assessment(session, message, &proposed);
        }

        // 6. Nothing to clarify: search directly.
        self.run_search(
            session,
            message,
            message,
            message,
            TurnState::FreshSearch,
            false,
        )
        .await
    }

    /// Clear stale category-scoped slots when the anchor category changed,
    /// then adopt the new domain/category. Mechanical and unconditional:
    /// classification output cannot override it.
    fn rebase_scope(&self, session: &mut Session, classification: &Classification) {
        if merge::scope_changed(session.category_path(), classification.category.as_deref()) {
            info!(
                old = session.category_path().unwrap_or("-"),
                new = classification.category.as_deref().unwrap_or("-"),
                "Anchor category changed, clearing category-scoped slots"
            );
            merge::clear_category_scope(session);
        }
        if classification.domain != Domain::Unknown {
            session.domain = classification.domain;
        }
        if let Some(category) = &classification.category {
            session.slots.entry(SlotKey::Category).or_insert_with(|| {
                Constraint::suggested(SlotKey::Category, SlotValue::Text(category.clone()))
            });
        }
    }

    // -------------------------------------------------------------------------
    // States
    // -------------------------------------------------------------------------

    fn begin_assessment(
        &self,
        session: &mut Session,
        message: &str,
        proposed: &[SlotKey],
    ) -> Result<BotResponse, ChatError> {
        let assessment = assessment::begin(message, proposed, &self.registry)?;
        let spec = self.registry.spec_for(proposed[0])?;

        session.push_turn(
            Turn::new(message, spec.question, TurnType::Casual, DataSource::None),
            self.session_cfg.history_turns,
        );
        session.assessment = Some(assessment);

        Ok(BotResponse {
            text: spec.question.to_string(),
            quick_replies: spec.quick_replies.iter().map(|s| s.to_string()).collect(),
            product_ids: vec![],
            state: TurnState::NewQuery,
        })
    }

    async fn continue_assessment(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<BotResponse, ChatError> {
        let Some(mut assessment) = session.assessment.take() else {
            return Err(ChatError::NoActiveQuestion);
        };
        let key = assessment
            .currently_asking
            .ok_or(ChatError::NoActiveQuestion)?;

        assessment::record_answer(&mut assessment, &mut session.slots, &self.registry, key, message)?;

        match assessment::advance(&mut assessment) {
            Some(next) => {
                let spec = self.registry.spec_for(next)?;
                session.push_turn(
                    Turn::new(message, spec.question, TurnType::Casual, DataSource::None),
                    self.session_cfg.history_turns,
                );
                session.assessment = Some(assessment);
                Ok(BotResponse {
                    text: spec.question.to_string(),
                    quick_replies: spec.quick_replies.iter().map(|s| s.to_string()).collect(),
                    product_ids: vec![],
                    state: TurnState::ContinuingAssessment,
                })
            }
            None => {
                // All slots collected. The search runs on the original
                // query; the last raw answer is often just "under ₹50" and
                // must never become the product noun.
                let anchor = assessment.original_query.clone();
                self.run_search(session, message, &anchor, &anchor, TurnState::FreshSearch, false)
                    .await
            }
        }
    }

    fn simple_reply(
        &self,
        session: &mut Session,
        message: &str,
        classification: &Classification,
    ) -> Result<BotResponse, ChatError> {
        let text = classification.simple_reply.clone().unwrap_or_else(|| {
            "Happy to help with your shopping - tell me what you're looking for.".to_string()
        });
        let turn_type = if classification.route == Route::Support {
            TurnType::Support
        } else {
            TurnType::Casual
        };
        session.push_turn(
            Turn::new(message, &text, turn_type, DataSource::None),
            self.session_cfg.history_turns,
        );
        Ok(BotResponse {
            text,
            quick_replies: vec![],
            product_ids: vec![],
            state: TurnState::SimpleReply,
        })
    }

    async fn memory_answer(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<BotResponse, ChatError> {
        let snapshot = session.snapshot();
        let formatted = memory::format_for_answering(
            &session.history,
            session.last_recommendation.as_ref(),
            self.session_cfg.memory_turns,
        );
        let answer = self
            .answerer
            .generate_from_memory(message, &formatted, &snapshot)
            .await?;

        let turn_type = memory::classify_turn_type(&answer, Route::Product);
        session.push_turn(
            Turn::new(message, &answer.summary_text, turn_type, DataSource::MemoryOnly),
            self.session_cfg.history_turns,
        );
        session.assessment = None;

        Ok(BotResponse {
            quick_replies: self.quick_replies_for(&answer),
            product_ids: answer.product_ids_ordered.clone(),
            text: answer.summary_text,
            state: TurnState::MemoryAnswer,
        })
    }

    /// Extract, merge, search, answer, and record the bookkeeping for a
    /// product turn. `extract_from` is the text handed to the extractor (the
    /// delta for follow-ups, the anchor otherwise); `anchor` parameterizes
    /// the search and the captured recommendation.
    async fn run_search(
        &self,
        session: &mut Session,
        message: &str,
        extract_from: &str,
        anchor: &str,
        state: TurnState,
        follow_up: bool,
    ) -> Result<BotResponse, ChatError> {
        let snapshot = session.snapshot();
        let extracted = self
            .extractor
            .extract(extract_from, &snapshot, follow_up)
            .await?;
        merge::apply_extracted(session, &extracted, follow_up);

        let request = SearchRequest {
            query: anchor.to_string(),
            domain: session.domain,
            category: session.category_path().map(str::to_string),
            constraints: session.slots.values().cloned().collect(),
        };
        let products = self.search.search(&request).await?;
        debug!(count = products.len(), anchor, "Search returned");

        let answer = self.answerer.generate(anchor, &products, &snapshot).await?;
        self.finish_product_turn(session, message, anchor, answer, &products, state)
    }

    fn finish_product_turn(
        &self,
        session: &mut Session,
        message: &str,
        anchor: &str,
        answer: Answer,
        products: &[Product],
        state: TurnState,
    ) -> Result<BotResponse, ChatError> {
        if !products.is_empty() {
            session.last_recommendation = Some(Recommendation::capture(
                anchor,
                products,
                self.session_cfg.max_snapshot_products,
            ));
        }
        let turn_type = memory::classify_turn_type(&answer, Route::Product);
        session.push_turn(
            Turn::new(message, &answer.summary_text, turn_type, DataSource::FreshSearch),
            self.session_cfg.history_turns,
        );
        session.assessment = None;

        Ok(BotResponse {
            quick_replies: self.quick_replies_for(&answer),
            product_ids: answer.product_ids_ordered.clone(),
            text: answer.summary_text,
            state,
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Quick replies from the answer, synthesized when the capability
    /// returned none, capped to the configured maximum.
    fn quick_replies_for(&self, answer: &Answer) -> Vec<String> {
        let mut replies = if answer.quick_replies.is_empty() {
            vec![
                "Tell me more".to_string(),
                "Show cheaper options".to_string(),
                "Start a new search".to_string(),
            ]
        } else {
            answer.quick_replies.clone()
        };
        replies.truncate(self.chat_cfg.max_quick_replies);
        replies
    }

    /// The single generic reply for unrecovered capability faults. The user
    /// never sees internals; the session is left untouched.
    fn fallback_response(&self) -> BotResponse {
        BotResponse {
            text: "Sorry, I couldn't work that out just now - could you rephrase?".to_string(),
            quick_replies: vec!["Start a new search".to_string()],
            product_ids: vec![],
            state: TurnState::SimpleReply,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use kirana_core::types::{ExtractedConstraint, SessionSnapshot, Strength};
    use kirana_store::MemorySessionStore;

    use crate::classify::HeuristicClassifier;

    // ---- Test doubles ----

    /// Store wrapper counting `save` calls.
    struct CountingStore {
        inner: MemorySessionStore,
        saves: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemorySessionStore::new(30),
                saves: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn get(
            &self,
            user_id: &str,
            session_id: &str,
        ) -> Result<Option<Session>, kirana_core::KiranaError> {
            self.inner.get(user_id, session_id).await
        }

        async fn save(&self, session: &Session) -> Result<(), kirana_core::KiranaError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(session).await
        }

        async fn delete(
            &self,
            user_id: &str,
            session_id: &str,
        ) -> Result<(), kirana_core::KiranaError> {
            self.inner.delete(user_id, session_id).await
        }
    }

    /// Extractor returning a fixed constraint list.
    struct StubExtractor {
        constraints: Vec<ExtractedConstraint>,
    }

    #[async_trait]
    impl ParamExtractor for StubExtractor {
        async fn extract(
            &self,
            _query: &str,
            _ctx: &SessionSnapshot,
            _follow_up: bool,
        ) -> Result<Vec<ExtractedConstraint>, ChatError> {
            Ok(self.constraints.clone())
        }
    }

    /// Search double capturing every request it receives.
    struct StubSearch {
        products: Vec<Product>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl StubSearch {
        fn with_products(products: Vec<Product>) -> Self {
            Self {
                products,
                requests: Mutex::new(vec![]),
            }
        }

        fn last_request(&self) -> SearchRequest {
            self.requests.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProductSearch for StubSearch {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<Product>, ChatError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.products.clone())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl ProductSearch for FailingSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<Product>, ChatError> {
            Err(ChatError::Search("index unavailable".to_string()))
        }
    }

    /// Answerer producing deterministic summaries; counts memory calls.
    struct StubAnswerer {
        memory_calls: AtomicUsize,
    }

    impl StubAnswerer {
        fn new() -> Self {
            Self {
                memory_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AnswerGenerator for StubAnswerer {
        async fn generate(
            &self,
            query: &str,
            products: &[Product],
            _ctx: &SessionSnapshot,
        ) -> Result<Answer, ChatError> {
            Ok(Answer {
                summary_text: format!("Found {} options for {}", products.len(), query),
                product_ids_ordered: products.iter().map(|p| p.id.clone()).collect(),
                quick_replies: vec![],
            })
        }

        async fn generate_from_memory(
            &self,
            query: &str,
            _memory: &str,
            ctx: &SessionSnapshot,
        ) -> Result<Answer, ChatError> {
            self.memory_calls.fetch_add(1, Ordering::SeqCst);
            let ids = ctx
                .last_recommendation
                .as_ref()
                .map(|rec| rec.products.iter().map(|p| p.id.clone()).collect())
                .unwrap_or_default();
            Ok(Answer {
                summary_text: format!("From what I showed you: {}", query),
                product_ids_ordered: ids,
                quick_replies: vec![],
            })
        }
    }

    /// Classifier that replays a fixed script of classifications.
    struct ScriptedClassifier {
        script: Mutex<Vec<Classification>>,
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(
            &self,
            _query: &str,
            _ctx: &SessionSnapshot,
        ) -> Result<Classification, ChatError> {
            let mut script = self.script.lock().unwrap();
            Ok(script.remove(0))
        }
    }

    fn product(id: &str, price: f64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            brand: "Acme".to_string(),
            price,
            rating: 4.0,
            attributes: BTreeMap::new(),
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<CountingStore>,
        search: Arc<StubSearch>,
        answerer: Arc<StubAnswerer>,
    }

    impl Harness {
        fn heuristic(products: Vec<Product>, extracted: Vec<ExtractedConstraint>) -> Self {
            Self::build(Arc::new(HeuristicClassifier), products, extracted)
        }

        fn build(
            classifier: Arc<dyn Classifier>,
            products: Vec<Product>,
            extracted: Vec<ExtractedConstraint>,
        ) -> Self {
            let store = Arc::new(CountingStore::new());
            let search = Arc::new(StubSearch::with_products(products));
            let answerer = Arc::new(StubAnswerer::new());
            let orchestrator = Orchestrator::new(
                store.clone(),
                classifier,
                Arc::new(StubExtractor {
                    constraints: extracted,
                }),
                search.clone(),
                answerer.clone(),
                SlotRegistry::standard(),
                SessionConfig::default(),
                ChatConfig::default(),
            );
            Self {
                orchestrator,
                store,
                search,
                answerer,
            }
        }

        async fn turn(&self, message: &str) -> BotResponse {
            self.orchestrator
                .handle_turn("u1", "s1", message)
                .await
                .unwrap()
        }

        async fn session(&self) -> Session {
            self.store.get("u1", "s1").await.unwrap().unwrap()
        }

        fn saves(&self) -> usize {
            self.store.saves.load(Ordering::SeqCst)
        }
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let h = Harness::heuristic(vec![], vec![]);
        let err = h.orchestrator.handle_turn("u1", "s1", "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert_eq!(h.saves(), 0);
    }

    #[tokio::test]
    async fn test_oversize_message_rejected() {
        let h = Harness::heuristic(vec![], vec![]);
        let long = "a".repeat(2001);
        let err = h.orchestrator.handle_turn("u1", "s1", &long).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong(2000)));
    }

    // ---- Simple replies ----

    #[tokio::test]
    async fn test_greeting_is_simple_reply() {
        let h = Harness::heuristic(vec![], vec![]);
        let resp = h.turn("hello").await;
        assert_eq!(resp.state, TurnState::SimpleReply);
        assert!(resp.product_ids.is_empty());

        let session = h.session().await;
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].turn_type, TurnType::Casual);
        assert_eq!(session.history[0].data_source, DataSource::None);
    }

    #[tokio::test]
    async fn test_support_reply_tagged_support() {
        let h = Harness::heuristic(vec![], vec![]);
        h.turn("I want a refund").await;
        let session = h.session().await;
        assert_eq!(session.history[0].turn_type, TurnType::Support);
    }

    // ---- Assessment flow ----

    #[tokio::test]
    async fn test_new_query_asks_first_slot() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        let resp = h.turn("I want chips").await;
        assert_eq!(resp.state, TurnState::NewQuery);
        assert!(resp.text.contains("budget"));
        assert!(!resp.quick_replies.is_empty());

        let session = h.session().await;
        let assessment = session.assessment.unwrap();
        assert_eq!(assessment.original_query, "I want chips");
        assert_eq!(assessment.currently_asking, Some(SlotKey::Budget));
    }

    #[tokio::test]
    async fn test_assessment_walks_slots_then_searches_anchor() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        h.turn("I want chips").await;

        let resp = h.turn("Under ₹50").await;
        assert_eq!(resp.state, TurnState::ContinuingAssessment);
        assert!(resp.text.contains("dietary"));

        let resp = h.turn("vegan").await;
        assert_eq!(resp.state, TurnState::FreshSearch);
        assert_eq!(resp.product_ids, vec!["p1"]);

        // The search is parameterized on the original query, not on the
        // literal text of the last clarifying answer.
        let request = h.search.last_request();
        assert_eq!(request.query, "I want chips");
        assert!(!request.query.to_lowercase().contains("vegan"));

        // Collected slot values rode along as constraints.
        let budget = request
            .constraints
            .iter()
            .find(|c| c.key == SlotKey::Budget)
            .unwrap();
        assert_eq!(
            budget.value,
            SlotValue::Price {
                min: None,
                max: Some(50.0)
            }
        );

        let session = h.session().await;
        assert!(session.assessment.is_none());
        assert!(session.last_recommendation.is_some());
    }

    #[tokio::test]
    async fn test_no_slots_needed_searches_directly() {
        let h = Harness::heuristic(vec![product("p1", 30.0)], vec![]);
        let resp = h.turn("vegan chips under ₹50").await;
        assert_eq!(resp.state, TurnState::FreshSearch);
        let session = h.session().await;
        assert!(session.assessment.is_none());
    }

    // ---- Exactly one save per turn ----

    #[tokio::test]
    async fn test_single_save_per_turn() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        h.turn("I want chips").await;
        assert_eq!(h.saves(), 1);
        h.turn("Under ₹50").await;
        assert_eq!(h.saves(), 2);
        h.turn("vegan").await;
        assert_eq!(h.saves(), 3);
    }

    #[tokio::test]
    async fn test_failed_turn_saves_nothing() {
        let store = Arc::new(CountingStore::new());
        let answerer = Arc::new(StubAnswerer::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(HeuristicClassifier),
            Arc::new(StubExtractor {
                constraints: vec![],
            }),
            Arc::new(FailingSearch),
            answerer,
            SlotRegistry::standard(),
            SessionConfig::default(),
            ChatConfig::default(),
        );

        // Heuristic proposes no slots for this fully constrained query, so
        // the turn goes straight to the (failing) search.
        let resp = orchestrator
            .handle_turn("u1", "s1", "vegan chips under ₹50")
            .await
            .unwrap();
        assert_eq!(resp.state, TurnState::SimpleReply);
        assert!(resp.text.contains("rephrase"));
        // No partial write: the store never saw a save, and the session does
        // not exist afterwards.
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert!(store.get("u1", "s1").await.unwrap().is_none());
    }

    // ---- Category isolation across anchors ----

    #[tokio::test]
    async fn test_category_switch_clears_prior_slots() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        h.turn("I want chips").await;
        h.turn("Under ₹50").await;
        h.turn("vegan").await; // chips search with dietary=vegan

        // New category: pasta. Price is mentioned and dietary was for chips,
        // so no clarification needed; the search must not carry vegan over.
        let resp = h.turn("show me pasta under ₹100").await;
        assert_eq!(resp.state, TurnState::FreshSearch);

        let request = h.search.last_request();
        assert_eq!(request.category.as_deref(), Some("pasta"));
        assert!(request
            .constraints
            .iter()
            .all(|c| c.key != SlotKey::Dietary));
    }

    // ---- User-provided values survive suggestions ----

    #[tokio::test]
    async fn test_user_dietary_unions_with_suggestion() {
        let h = Harness::heuristic(
            vec![product("p1", 40.0)],
            vec![ExtractedConstraint {
                key: SlotKey::Dietary,
                value: SlotValue::Terms(vec!["vegan".into(), "low sodium".into()]),
                strength: Strength::Soft,
            }],
        );
        h.turn("I want chips").await;
        h.turn("Under ₹50").await;
        h.turn("vegan").await;

        let request = h.search.last_request();
        let dietary = request
            .constraints
            .iter()
            .find(|c| c.key == SlotKey::Dietary)
            .unwrap();
        assert_eq!(
            dietary.value,
            SlotValue::Terms(vec!["vegan".into(), "low sodium".into()])
        );
        assert_eq!(dietary.provenance, kirana_core::types::Provenance::User);
    }

    // ---- Follow-up ----

    #[tokio::test]
    async fn test_price_delta_refines_anchor() {
        let h = Harness::heuristic(
            vec![product("p1", 40.0)],
            vec![ExtractedConstraint {
                key: SlotKey::Budget,
                value: SlotValue::Price {
                    min: None,
                    max: Some(50.0),
                },
                strength: Strength::Hard,
            }],
        );
        h.turn("vegan chips under ₹200").await; // establishes the anchor

        let resp = h.turn("under ₹50").await;
        assert_eq!(resp.state, TurnState::FollowUp);

        let request = h.search.last_request();
        // Anchored on the original query, not on "under ₹50".
        assert_eq!(request.query, "vegan chips under ₹200");
        assert_eq!(request.category.as_deref(), Some("vegan chips"));
        let budget = request
            .constraints
            .iter()
            .find(|c| c.key == SlotKey::Budget)
            .unwrap();
        assert_eq!(
            budget.value,
            SlotValue::Price {
                min: None,
                max: Some(50.0)
            }
        );
    }

    // ---- Memory answers ----

    #[tokio::test]
    async fn test_memory_reference_answers_from_memory() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        h.turn("vegan chips under ₹50").await;

        let resp = h.turn("tell me more about those").await;
        assert_eq!(resp.state, TurnState::MemoryAnswer);
        assert_eq!(resp.product_ids, vec!["p1"]);
        assert_eq!(h.answerer.memory_calls.load(Ordering::SeqCst), 1);

        let session = h.session().await;
        let last = session.history.last().unwrap();
        assert_eq!(last.data_source, DataSource::MemoryOnly);
        // No new search ran for this turn.
        assert_eq!(h.search.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_without_recommendation_never_crashes() {
        // Scenario: "tell me more about those" as the opening message.
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        let resp = h.turn("tell me more about those chips").await;
        // No memory exists; the turn degrades into an ordinary search path.
        assert_ne!(resp.state, TurnState::MemoryAnswer);
        assert_eq!(h.answerer.memory_calls.load(Ordering::SeqCst), 0);
    }

    // ---- Memory fallback at the orchestrator level ----

    #[tokio::test]
    async fn test_memory_strategy_without_memory_falls_back_to_search() {
        // A classifier that insists on memory-only even though the session
        // has nothing to remember.
        let scripted = ScriptedClassifier {
            script: Mutex::new(vec![Classification {
                route: Route::Product,
                data_strategy: DataStrategy::MemoryOnly,
                domain: Domain::FAndB,
                category: Some("chips".to_string()),
                proposed_slots: vec![],
                simple_reply: None,
                is_follow_up: false,
            }]),
        };
        let h = Harness::build(Arc::new(scripted), vec![product("p1", 40.0)], vec![]);

        let resp = h.turn("those ones").await;
        assert_eq!(resp.state, TurnState::FreshSearch);
        assert_eq!(h.answerer.memory_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.search.requests.lock().unwrap().len(), 1);
    }

    // ---- Answer-loss protection ----

    #[tokio::test]
    async fn test_assessment_without_question_fails_loudly() {
        let h = Harness::heuristic(vec![], vec![]);
        h.turn("I want chips").await;

        // Corrupt the stored assessment so no question is pending.
        let mut session = h.session().await;
        session.assessment.as_mut().unwrap().currently_asking = None;
        h.store.save(&session).await.unwrap();
        let saves_before = h.saves();

        let err = h
            .orchestrator
            .handle_turn("u1", "s1", "Under ₹50")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NoActiveQuestion));
        // The failed turn wrote nothing.
        assert_eq!(h.saves(), saves_before);
    }

    // ---- Quick replies ----

    #[tokio::test]
    async fn test_quick_replies_synthesized_when_missing() {
        let h = Harness::heuristic(vec![product("p1", 40.0)], vec![]);
        let resp = h.turn("vegan chips under ₹50").await;
        assert!(!resp.quick_replies.is_empty());
        assert!(resp.quick_replies.len() <= ChatConfig::default().max_quick_replies);
    }

    // ---- Empty search results ----

    #[tokio::test]
    async fn test_empty_results_do_not_create_recommendation() {
        let h = Harness::heuristic(vec![], vec![]);
        let resp = h.turn("vegan chips under ₹50").await;
        assert_eq!(resp.state, TurnState::FreshSearch);
        assert!(resp.product_ids.is_empty());

        let session = h.session().await;
        assert!(session.last_recommendation.is_none());
        // With no products the turn is not a product turn.
        assert_eq!(session.history.last().unwrap().turn_type, TurnType::Casual);
    }

    // ---- History bounding ----

    #[tokio::test]
    async fn test_history_stays_bounded() {
        let h = Harness::heuristic(vec![], vec![]);
        for i in 0..15 {
            h.turn(&format!("hello again {}", i)).await;
        }
        let session = h.session().await;
        assert_eq!(
            session.history.len(),
            SessionConfig::default().history_turns
        );
    }
}
