//! LLM client port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::LlmError;

/// Chat role for model requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat message in a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Port for text generation backends.
///
/// Concrete bindings (HTTP clients, local models) live outside the scheduler;
/// the scheduler only depends on this narrow surface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the given chat messages.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
