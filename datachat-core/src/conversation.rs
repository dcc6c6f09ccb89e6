//! Conversation state for one chat screen: message history, the backend session id,
//! and the dataset key every request is tied to.
//!
//! Failure policy: when a turn fails, the user's message stays in the history and the
//! partial bot reply is removed, so the history never shows half an answer.

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::client::ChatBackend;
use crate::error::{CoreResult, DataChatError};
use crate::model::{ChatMessage, ChatTurn, FinalPayload, Sender};
use crate::normalizer::normalize_message;
use crate::stream::UpdateEvent;

#[derive(Debug, Default)]
pub struct Conversation {
    dataset_key: Option<SecretString>,
    session_id: Option<String>,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(dataset_key: impl Into<String>) -> Self {
        let mut conv = Self::default();
        conv.replace_key(dataset_key);
        conv
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn dataset_key(&self) -> Option<&str> {
        self.dataset_key.as_ref().map(|k| k.expose_secret())
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::user(text));
    }

    /// Append the empty bot message that streamed text is written into.
    pub fn begin_bot(&mut self) {
        self.messages.push(ChatMessage::bot(""));
    }

    /// Replace the content of the trailing bot message, if there is one.
    pub fn update_bot(&mut self, text: &str) {
        if let Some(last) = self.messages.last_mut()
            && last.sender == Sender::Bot
        {
            last.content.clear();
            last.content.push_str(text);
        }
    }

    pub fn complete_bot(&mut self, payload: &FinalPayload) {
        self.update_bot(&payload.final_response);
        if let Some(sid) = payload.session_id.as_deref().filter(|s| !s.is_empty()) {
            self.session_id = Some(sid.to_string());
        }
    }

    /// Drop the trailing bot message after a failed turn.
    pub fn abandon_bot(&mut self) {
        if self.messages.last().is_some_and(|m| m.sender == Sender::Bot) {
            self.messages.pop();
        }
    }

    /// Continue a backend session started elsewhere (e.g. an earlier CLI run).
    pub fn resume_session(&mut self, session_id: Option<String>) {
        self.session_id = session_id.filter(|s| !s.is_empty());
    }

    /// Start a new chat instance on the same dataset.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.session_id = None;
    }

    /// Point the conversation at another dataset. History refers to the old one and is dropped.
    pub fn replace_key(&mut self, key: impl Into<String>) {
        let key: String = key.into();
        self.reset();
        self.dataset_key = if key.trim().is_empty() {
            None
        } else {
            Some(SecretString::new(key.into()))
        };
    }

    pub fn clear_key(&mut self) {
        self.replace_key(String::new());
    }

    /// Run one full turn: record the user's message, stream the reply into a bot
    /// message (calling `on_update` with the text to show), and return the final payload.
    ///
    /// Taking `&mut self` keeps a second send from starting while a reply is streaming.
    pub async fn send<B, F>(&mut self, backend: &B, raw: &str, mut on_update: F) -> CoreResult<FinalPayload>
    where
        B: ChatBackend + ?Sized,
        F: FnMut(&str),
    {
        let Some(key) = self.dataset_key.as_ref() else {
            return Err(DataChatError::MissingKey);
        };
        let message = normalize_message(raw)?;
        let turn = ChatTurn {
            dataset_key: SecretString::new(key.expose_secret().into()),
            message: message.clone(),
            session_id: self.session_id.clone(),
        };
        self.push_user(message);

        let mut events = match backend.open_chat(&turn).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                return Err(e);
            }
        };
        self.begin_bot();

        while let Some(ev) = events.next().await {
            match ev {
                UpdateEvent::Partial(text) => {
                    self.update_bot(&text);
                    on_update(&text);
                }
                UpdateEvent::Final(payload) => {
                    self.complete_bot(&payload);
                    tracing::info!(
                        answer_len = payload.final_response.len(),
                        session_id = payload.session_id.as_deref().unwrap_or("-"),
                        "chat turn complete"
                    );
                    return Ok(payload);
                }
                UpdateEvent::Failure(e) => {
                    self.abandon_bot();
                    tracing::warn!(error = %e, "chat stream failed");
                    return Err(e);
                }
            }
        }
        self.abandon_bot();
        Err(DataChatError::Transport(
            "response stream ended without a terminal event".into(),
        ))
    }
}
