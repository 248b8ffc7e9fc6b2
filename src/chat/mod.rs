use serde::{Deserialize, Serialize};

pub mod context;
pub mod intent;
pub mod prompt;
pub mod service;
pub mod validate;

pub use context::{ContextExtractor, ConversationContext};
pub use intent::{ClassifierRules, Intent, IntentClassifier, IntentResult, Mood};
pub use prompt::PromptBuilder;
pub use service::{ChatService, ChatSettings};
pub use validate::{OutputValidator, Suggestion};

/// One turn of the conversation as submitted by the client. Array position
/// is chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Client-facing reply: natural-language text plus validated suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub suggestions: Vec<Suggestion>,
}
