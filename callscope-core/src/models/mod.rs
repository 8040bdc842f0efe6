pub mod conversation;
pub mod document;
pub mod record;

pub use conversation::{ConversationLog, ConversationTurn, Role};
pub use document::{Document, DocumentMetadata, RetrievedDocument};
pub use record::{StoreMetadata, SummaryRecord};
