//! Conversational core for Kirana.
//!
//! Implements the multi-turn conversation state machine: slot-filling
//! assessments, provenance-aware constraint merging, memory formatting,
//! and the orchestrator that ties them to the external classification,
//! extraction, search, and answer-generation capabilities.

pub mod assessment;
pub mod capabilities;
pub mod classify;
pub mod error;
pub mod memory;
pub mod merge;
pub mod orchestrator;
pub mod slots;

pub use capabilities::{Answer, AnswerGenerator, ParamExtractor, ProductSearch, SearchRequest};
pub use classify::{Classification, Classifier, DataStrategy, HeuristicClassifier, Route};
pub use error::ChatError;
pub use orchestrator::{BotResponse, Orchestrator, TurnState};
pub use slots::{SlotKind, SlotRegistry, SlotSpec};
