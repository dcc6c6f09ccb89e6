use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: Sender,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::Bot,
            content: content.into(),
        }
    }
}

/// Structured payload that follows the completion marker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FinalPayload {
    pub final_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Body returned by the upload endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub redis_key: String,
}

/// Everything one chat request carries to the backend.
#[derive(Debug)]
pub struct ChatTurn {
    pub dataset_key: SecretString,
    pub message: String,
    pub session_id: Option<String>,
}
