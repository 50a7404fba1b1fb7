//! External capability contracts.
//!
//! The LLM-backed extraction/answering services and the product index are
//! out of scope for the conversation core; these traits are the boundary.
//! Every capability receives a read-only [`SessionSnapshot`] and can never
//! mutate conversation state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kirana_core::types::{
    Constraint, Domain, ExtractedConstraint, Product, SessionSnapshot,
};

use crate::error::ChatError;

/// The generated answer contract: summary text plus structured UX metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub summary_text: String,
    /// Product ids in presentation order.
    pub product_ids_ordered: Vec<String>,
    pub quick_replies: Vec<String>,
}

/// Parameters handed to the search capability.
///
/// `query` is always the anchor query of the conversation, never the raw
/// text of a clarifying answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub domain: Domain,
    pub category: Option<String>,
    pub constraints: Vec<Constraint>,
}

/// Extracts typed search constraints from a query in context.
#[async_trait]
pub trait ParamExtractor: Send + Sync {
    async fn extract(
        &self,
        query: &str,
        ctx: &SessionSnapshot,
        follow_up: bool,
    ) -> Result<Vec<ExtractedConstraint>, ChatError>;
}

/// Queries the product index. Opaque to the core; the core only requires
/// stable product ids.
#[async_trait]
pub trait ProductSearch: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Product>, ChatError>;
}

/// Generates the natural-language answer, either from fresh search results
/// or from formatted conversation memory.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        products: &[Product],
        ctx: &SessionSnapshot,
    ) -> Result<Answer, ChatError>;

    async fn generate_from_memory(
        &self,
        query: &str,
        memory: &str,
        ctx: &SessionSnapshot,
    ) -> Result<Answer, ChatError>;
}
