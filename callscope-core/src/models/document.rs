use serde::{Deserialize, Serialize};

/// Retrievable rendering of one [`super::SummaryRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Citation and filtering fields carried alongside each document.
///
/// Missing text fields are empty strings and missing numbers are zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub call_id: i64,
    pub agent_name: String,
    pub agent_id: String,
    pub customer_name: String,
    pub agent_score: f64,
    pub agent_rating: f64,
    pub resolution_status: String,
    pub issue_category: String,
    pub department: String,
    pub sentiment: String,
}

/// A document returned by similarity search, with its cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub score: f32,
}
