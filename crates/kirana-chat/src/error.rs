//! Error types for the conversation core.

use kirana_core::error::KiranaError;
use kirana_core::types::SlotKey;

/// Errors from the conversation engine.
///
/// The first group are caller-contract violations: they indicate a bug in
/// the calling code and are never silently swallowed. The capability
/// variants wrap failures of the external classification/extraction/search/
/// answer services; the orchestrator recovers from those with a fallback
/// reply and no session write.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("no active question to record an answer for")]
    NoActiveQuestion,
    #[error("assessment is already complete")]
    AssessmentComplete,
    #[error("cannot begin an assessment with no proposed slots")]
    NoSlotsProposed,
    #[error("slot {0:?} is not registered")]
    UnknownSlot(SlotKey),
    #[error("classification error: {0}")]
    Classification(String),
    #[error("extraction error: {0}")]
    Extraction(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("answer generation error: {0}")]
    Answer(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// True for failures of an external capability, which the orchestrator
    /// degrades gracefully instead of surfacing to the user.
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Classification(_)
                | ChatError::Extraction(_)
                | ChatError::Search(_)
                | ChatError::Answer(_)
        )
    }
}

impl From<KiranaError> for ChatError {
    fn from(err: KiranaError) -> Self {
        ChatError::Storage(err.to_string())
    }
}
