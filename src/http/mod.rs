use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::pipeline::ChatPipeline;
use crate::store::ConversationStore;

mod auth;
mod handlers;
mod types;

const BODY_LIMIT: usize = 1024 * 1024;

pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub pipeline: Arc<ChatPipeline>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let chatbot = Router::new()
        .route(
            "/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(handlers::get_conversation)
                .put(handlers::update_conversation)
                .patch(handlers::update_conversation)
                .delete(handlers::deactivate_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handlers::conversation_messages),
        )
        .route("/send", post(handlers::send_message))
        .route("/send/stream", post(handlers::stream_message))
        .route("/send/{conversation_id}", post(handlers::send_message_to))
        .route(
            "/send/{conversation_id}/stream",
            post(handlers::stream_message_to),
        )
        .route("/ollama-status", get(handlers::backend_status))
        .route(
            "/admin/conversations/{id}",
            delete(handlers::admin_delete_conversation),
        );

    Router::new()
        .nest("/api/chatbot", chatbot)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
