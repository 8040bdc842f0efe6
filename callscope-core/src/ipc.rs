use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::models::ConversationTurn;

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Top-k retrieved summaries as context.
    #[default]
    Rag,
    /// Every summary as context, no index.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallscopeRequest {
    Ping,
    Info,
    Rebuild {
        #[serde(default)]
        force: bool,
    },
    Clear,
    Search {
        query: String,
        limit: Option<u32>,
    },
    Chat {
        query: String,
        #[serde(default)]
        history: Vec<ConversationTurn>,
        #[serde(default)]
        mode: ChatMode,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CallscopeResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable error tag, see [`RagError::kind`].
    #[serde(default)]
    pub kind: Option<String>,
    pub version: String,
}

impl CallscopeResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            kind: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            kind: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn from_error(error: &RagError) -> Self {
        Self {
            kind: Some(error.kind().to_string()),
            ..Self::err(error.to_string())
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
