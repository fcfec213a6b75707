//! Chat request and reply shapes for the wellness assistant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stress report computed by the client, passed through verbatim.
///
/// Known keys: `stressLevel`, `finalScore`, `emotionScore`, `cognitiveScore`,
/// `healthScore`.
pub type ReportContext = Map<String, Value>;

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role (`user`, `assistant`, ...).
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Optional stress report.
    #[serde(rename = "reportContext", default)]
    pub report_context: Option<ReportContext>,
}

/// Streaming-style delta carrying the reply text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Reply text.
    pub content: String,
}

/// One reply choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Reply delta.
    pub delta: ChatDelta,
}

/// Body of a successful `/chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Always exactly one choice.
    pub choices: Vec<ChatChoice>,
}

impl ChatReply {
    /// Wraps reply text in the single-choice envelope the client reads.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChatChoice {
                delta: ChatDelta {
                    content: content.into(),
                },
            }],
        }
    }

    /// Returns the reply text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.choices
            .first()
            .map_or("", |choice| choice.delta.content.as_str())
    }
}
