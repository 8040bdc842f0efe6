//! Renders summary records into retrievable documents.

use crate::models::{Document, DocumentMetadata, SummaryRecord};

const UNKNOWN: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";

/// One document per record, in the same order.
pub fn build(records: &[SummaryRecord]) -> Vec<Document> {
    let documents: Vec<Document> = records.iter().map(build_one).collect();
    tracing::debug!(count = documents.len(), "Prepared documents");
    documents
}

pub fn build_one(record: &SummaryRecord) -> Document {
    Document {
        content: render_content(record),
        metadata: metadata_for(record),
    }
}

fn text<'a>(field: &'a Option<String>, placeholder: &'a str) -> &'a str {
    field.as_deref().unwrap_or(placeholder)
}

fn number(field: Option<f64>) -> String {
    match field {
        Some(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", n as i64),
        Some(n) => format!("{n}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn render_content(r: &SummaryRecord) -> String {
    let call_id = r
        .call_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let date = match (&r.conversation_date, &r.conversation_time) {
        (Some(d), Some(t)) => format!("{d} {t}"),
        (Some(d), None) => d.clone(),
        (None, Some(t)) => format!("{NOT_AVAILABLE} {t}"),
        (None, None) => NOT_AVAILABLE.to_string(),
    };

    [
        format!("Call Summary (Call ID: {call_id}):"),
        format!(
            "Agent: {} (ID: {})",
            text(&r.agent_name, UNKNOWN),
            text(&r.agent_id, NOT_AVAILABLE)
        ),
        format!("Customer: {}", text(&r.customer_name, UNKNOWN)),
        format!("Date: {date}"),
        format!("Duration: {}", text(&r.conversation_length, NOT_AVAILABLE)),
        format!("Department: {}", text(&r.department, NOT_AVAILABLE)),
        String::new(),
        format!("Issue Category: {}", text(&r.issue_category, NOT_AVAILABLE)),
        format!("Summary: {}", text(&r.call_summary, NOT_AVAILABLE)),
        String::new(),
        format!("Customer Tone: {}", text(&r.customer_tone, NOT_AVAILABLE)),
        format!("Customer Emotions: {}", text(&r.customer_emotions, NOT_AVAILABLE)),
        format!("Agent Tone: {}", text(&r.agent_tone, NOT_AVAILABLE)),
        format!("Agent Emotions: {}", text(&r.agent_emotions, NOT_AVAILABLE)),
        String::new(),
        format!("Agent Performance Score: {}/100", number(r.agent_score)),
        format!("Agent Rating: {}/5", number(r.agent_rating)),
        format!("Resolution Status: {}", text(&r.resolution_status, NOT_AVAILABLE)),
        format!("Sentiment: {}", text(&r.sentiment, NOT_AVAILABLE)),
        format!("Source File: {}", text(&r.file_name, NOT_AVAILABLE)),
    ]
    .join("\n")
}

fn metadata_for(r: &SummaryRecord) -> DocumentMetadata {
    let owned = |field: &Option<String>| field.clone().unwrap_or_default();
    DocumentMetadata {
        call_id: r.call_id.unwrap_or(0),
        agent_name: owned(&r.agent_name),
        agent_id: owned(&r.agent_id),
        customer_name: owned(&r.customer_name),
        agent_score: r.agent_score.unwrap_or(0.0),
        agent_rating: r.agent_rating.unwrap_or(0.0),
        resolution_status: owned(&r.resolution_status),
        issue_category: owned(&r.issue_category),
        department: owned(&r.department),
        sentiment: owned(&r.sentiment),
    }
}
