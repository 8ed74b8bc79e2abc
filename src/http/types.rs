use crate::store::{Conversation, Message, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct LastMessage {
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for LastMessage {
    fn from(m: Message) -> Self {
        Self {
            content: m.content,
            sender: m.sender,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub message_count: u64,
    pub last_message: Option<LastMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

impl ConversationResponse {
    pub fn summary(conversation: Conversation, message_count: u64, last: Option<Message>) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            is_active: conversation.is_active,
            message_count,
            last_message: last.map(LastMessage::from),
            messages: None,
        }
    }

    pub fn detail(conversation: Conversation, messages: Vec<Message>) -> Self {
        let message_count = messages.len() as u64;
        let last = messages.last().cloned();
        Self {
            messages: Some(messages),
            ..Self::summary(conversation, message_count, last)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub conversation: ConversationResponse,
    pub messages: Vec<Message>,
}

/// Payload of a `delta` stream event. JSON keeps any line breaks in the
/// fragment out of the event framing.
#[derive(Debug, Serialize)]
pub struct DeltaPayload<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ollama_available: bool,
    pub model: String,
    pub base_url: String,
}
