use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, Sse},
    },
};
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{error, instrument};

use super::AppState;
use super::auth::{AdminUser, AuthUser};
use super::types::{
    ConversationResponse, CreateConversationRequest, DeltaPayload, MessagesResponse,
    SendMessageRequest, StatusResponse,
};
use crate::error::ChatError;
use crate::pipeline::PipelineEvent;
use crate::store::ConversationUpdate;

#[instrument(skip(state))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConversationResponse>>, ChatError> {
    let conversations = state.store.list_active(user_id).await?;

    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let (count, last) = state.store.message_stats(conversation.id).await?;
        summaries.push(ConversationResponse::summary(conversation, count, last));
    }
    Ok(Json(summaries))
}

const MAX_TITLE_CHARS: usize = 200;

fn check_title_length(title: Option<&str>) -> Result<(), ChatError> {
    match title {
        Some(title) if title.trim().chars().count() > MAX_TITLE_CHARS => Err(
            ChatError::Validation(format!("Title may not exceed {} characters", MAX_TITLE_CHARS)),
        ),
        _ => Ok(()),
    }
}

#[instrument(skip(state, request))]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Response, ChatError> {
    check_title_length(request.title.as_deref())?;
    let conversation = state
        .store
        .create_conversation(user_id, request.title.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::summary(conversation, 0, None)),
    )
        .into_response())
}

/// Direct lookup by id; deactivated conversations are still readable here.
#[instrument(skip(state))]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationResponse>, ChatError> {
    let conversation = state
        .store
        .get_for_user(id, user_id)
        .await?
        .ok_or(ChatError::NotFound)?;
    let messages = state.store.messages(conversation.id).await?;
    Ok(Json(ConversationResponse::detail(conversation, messages)))
}

#[instrument(skip(state, update))]
pub async fn update_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<ConversationUpdate>,
) -> Result<Json<ConversationResponse>, ChatError> {
    if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ChatError::Validation("Title may not be blank".to_string()));
    }
    check_title_length(update.title.as_deref())?;

    let conversation = state
        .store
        .update_conversation(id, user_id, update)
        .await?
        .ok_or(ChatError::NotFound)?;
    let messages = state.store.messages(conversation.id).await?;
    Ok(Json(ConversationResponse::detail(conversation, messages)))
}

#[instrument(skip(state))]
pub async fn deactivate_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ChatError> {
    if state.store.deactivate(id, user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ChatError::NotFound)
    }
}

#[instrument(skip(state))]
pub async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MessagesResponse>, ChatError> {
    let conversation = state
        .store
        .get_active_for_user(id, user_id)
        .await?
        .ok_or(ChatError::NotFound)?;
    let messages = state.store.messages(conversation.id).await?;
    Ok(Json(MessagesResponse {
        conversation: ConversationResponse::detail(conversation, messages.clone()),
        messages,
    }))
}

#[instrument(skip(state, request))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    send(state, user_id, None, request).await
}

#[instrument(skip(state, request))]
pub async fn send_message_to(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    send(state, user_id, Some(conversation_id), request).await
}

async fn send(
    state: Arc<AppState>,
    user_id: i64,
    conversation_id: Option<i64>,
    request: SendMessageRequest,
) -> Result<Response, ChatError> {
    let outcome = state
        .pipeline
        .send_message(user_id, conversation_id, &request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

#[instrument(skip(state, request))]
pub async fn stream_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    stream_reply(state, user_id, None, request).await
}

#[instrument(skip(state, request))]
pub async fn stream_message_to(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    stream_reply(state, user_id, Some(conversation_id), request).await
}

/// Server-sent events: `delta` events carry reply fragments as
/// `{"text": ...}`, then one `message` event carries the persisted exchange.
async fn stream_reply(
    state: Arc<AppState>,
    user_id: i64,
    conversation_id: Option<i64>,
    request: SendMessageRequest,
) -> Result<Response, ChatError> {
    // Reject up front so these still map to proper status codes.
    if request.content.trim().is_empty() {
        return Err(ChatError::Validation(
            "Message content may not be blank".to_string(),
        ));
    }
    if let Some(id) = conversation_id {
        state
            .store
            .get_active_for_user(id, user_id)
            .await?
            .ok_or(ChatError::NotFound)?;
    }

    let (tx, rx) = mpsc::channel(32);
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline
            .send_message_streaming(user_id, conversation_id, &request.content, tx)
            .await
        {
            error!("Streaming send failed: {}", e);
        }
    });

    Ok(Sse::new(pipeline_events(rx)).into_response())
}

fn pipeline_events(
    rx: mpsc::Receiver<PipelineEvent>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, |mut rx| async move {
        let event = match rx.recv().await? {
            PipelineEvent::Delta(fragment) => Event::default()
                .event("delta")
                .json_data(DeltaPayload { text: &fragment }),
            PipelineEvent::Completed(outcome) => {
                Event::default().event("message").json_data(&*outcome)
            }
        };
        Some((event, rx))
    })
}

#[instrument(skip(state))]
pub async fn backend_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let backend = state.pipeline.backend();
    Json(StatusResponse {
        ollama_available: backend.probe().await,
        model: backend.model().to_string(),
        base_url: backend.base_url().to_string(),
    })
}

#[instrument(skip(state))]
pub async fn admin_delete_conversation(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin_id): AdminUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ChatError> {
    if state.store.delete_conversation(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ChatError::NotFound)
    }
}
