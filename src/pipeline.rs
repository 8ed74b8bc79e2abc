use crate::backend::{GenerationOutcome, GenerationResult, ModelBackend, StreamEvent};
use crate::error::ChatError;
use crate::fallback;
use crate::store::{Conversation, ConversationStore, Message, NewMessage};
use crate::utils::preview;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages fed back to the model as conversation context.
const CONTEXT_MESSAGES: usize = 5;
/// Reported processing time when the backend is not even reachable.
const UNAVAILABLE_PROCESSING_TIME: f64 = 0.1;
const LOG_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub conversation_id: i64,
    pub user_message: Message,
    pub assistant_message: Message,
    pub processing_time: f64,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Delta(String),
    Completed(Box<SendOutcome>),
}

struct Turn {
    conversation: Conversation,
    user_message: Message,
    context: String,
}

pub struct ChatPipeline {
    store: Arc<ConversationStore>,
    backend: Arc<dyn ModelBackend>,
    rng: Mutex<StdRng>,
}

impl ChatPipeline {
    pub fn new(store: Arc<ConversationStore>, backend: Arc<dyn ModelBackend>) -> Arc<Self> {
        Self::with_rng(store, backend, StdRng::from_entropy())
    }

    pub fn with_rng(
        store: Arc<ConversationStore>,
        backend: Arc<dyn ModelBackend>,
        rng: StdRng,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            rng: Mutex::new(rng),
        })
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Runs one user turn: persist the user message, ask the backend (or the
    /// fallback table), persist the assistant reply.
    ///
    /// Backend problems never fail the call. Only a blank message, an unknown
    /// conversation or a store failure do.
    pub async fn send_message(
        &self,
        user_id: i64,
        conversation_id: Option<i64>,
        content: &str,
    ) -> Result<SendOutcome, ChatError> {
        let turn = self.begin(user_id, conversation_id, content).await?;

        let (reply, processing_time) = if self.backend.probe().await {
            let result = self
                .backend
                .generate(&turn.user_message.content, Some(&turn.context))
                .await;
            self.accept(result)
        } else {
            warn!("Model backend unavailable, using fallback replies");
            (None, UNAVAILABLE_PROCESSING_TIME)
        };

        let reply = reply.unwrap_or_else(|| self.fallback_reply(&turn.user_message.content));
        self.finish(turn, reply, processing_time).await
    }

    /// Same turn as [`send_message`](Self::send_message), forwarding reply
    /// fragments over `tx` as they arrive.
    ///
    /// A fallback reply is sent as a single delta. The final
    /// `PipelineEvent::Completed` carries the persisted messages and is the
    /// authoritative reply text.
    pub async fn send_message_streaming(
        &self,
        user_id: i64,
        conversation_id: Option<i64>,
        content: &str,
        tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<SendOutcome, ChatError> {
        let turn = self.begin(user_id, conversation_id, content).await?;

        let (reply, processing_time) = if self.backend.probe().await {
            let (backend_tx, mut backend_rx) = mpsc::channel(32);
            let forward = async {
                while let Some(event) = backend_rx.recv().await {
                    if let StreamEvent::TextDelta(fragment) = event {
                        let _ = tx.send(PipelineEvent::Delta(fragment)).await;
                    }
                }
            };
            let (result, ()) = tokio::join!(
                self.backend.generate_stream(
                    &turn.user_message.content,
                    Some(&turn.context),
                    backend_tx
                ),
                forward
            );
            self.accept(result)
        } else {
            warn!("Model backend unavailable, using fallback replies");
            (None, UNAVAILABLE_PROCESSING_TIME)
        };

        let reply = match reply {
            Some(reply) => reply,
            None => {
                let reply = self.fallback_reply(&turn.user_message.content);
                let _ = tx.send(PipelineEvent::Delta(reply.clone())).await;
                reply
            }
        };

        let outcome = self.finish(turn, reply, processing_time).await?;
        let _ = tx
            .send(PipelineEvent::Completed(Box::new(outcome.clone())))
            .await;
        Ok(outcome)
    }

    async fn begin(
        &self,
        user_id: i64,
        conversation_id: Option<i64>,
        content: &str,
    ) -> Result<Turn, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation(
                "Message content may not be blank".to_string(),
            ));
        }

        let conversation = match conversation_id {
            Some(id) => self
                .store
                .get_active_for_user(id, user_id)
                .await?
                .ok_or(ChatError::NotFound)?,
            None => self.store.create_conversation(user_id, None).await?,
        };

        let user_message = self
            .store
            .append_message(conversation.id, NewMessage::from_user(content))
            .await?;

        let context = self
            .store
            .recent_messages(conversation.id, CONTEXT_MESSAGES)
            .await?
            .iter()
            .map(|m| format!("{}: {}", m.sender, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        debug!(
            "Conversation {}: user message {} stored: {}",
            conversation.id,
            user_message.id,
            preview(&user_message.content, LOG_PREVIEW_CHARS)
        );
        Ok(Turn {
            conversation,
            user_message,
            context,
        })
    }

    fn accept(&self, result: GenerationResult) -> (Option<String>, f64) {
        let processing_time = result.processing_time();
        match result.outcome {
            GenerationOutcome::Success(text) => (Some(text), processing_time),
            GenerationOutcome::Failure(error) => {
                warn!("Model backend error ({}): {}", result.model, error);
                (None, processing_time)
            }
        }
    }

    fn fallback_reply(&self, content: &str) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        fallback::respond(content, &mut *rng)
    }

    async fn finish(
        &self,
        turn: Turn,
        reply: String,
        processing_time: f64,
    ) -> Result<SendOutcome, ChatError> {
        let assistant_message = self
            .store
            .append_message(
                turn.conversation.id,
                NewMessage::from_assistant(reply, processing_time),
            )
            .await?;

        info!(
            "Conversation {}: replied in {:.2}s",
            turn.conversation.id, processing_time
        );
        Ok(SendOutcome {
            conversation_id: turn.conversation.id,
            user_message: turn.user_message,
            assistant_message,
            processing_time,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Sender;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted backend: either down, or answering with a fixed outcome.
    pub(crate) struct FakeBackend {
        available: bool,
        outcome: GenerationOutcome,
        elapsed: Duration,
        pub generate_calls: AtomicUsize,
        pub last_context: Mutex<Option<String>>,
    }

    impl FakeBackend {
        pub(crate) fn down() -> Arc<Self> {
            Self::scripted(false, GenerationOutcome::Failure("unused".into()), 0)
        }

        pub(crate) fn replying(text: &str, elapsed_ms: u64) -> Arc<Self> {
            Self::scripted(true, GenerationOutcome::Success(text.into()), elapsed_ms)
        }

        pub(crate) fn failing(error: &str, elapsed_ms: u64) -> Arc<Self> {
            Self::scripted(true, GenerationOutcome::Failure(error.into()), elapsed_ms)
        }

        fn scripted(available: bool, outcome: GenerationOutcome, elapsed_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                available,
                outcome,
                elapsed: Duration::from_millis(elapsed_ms),
                generate_calls: AtomicUsize::new(0),
                last_context: Mutex::new(None),
            })
        }

        fn result(&self, context: Option<&str>) -> GenerationResult {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock().unwrap() = context.map(str::to_string);
            GenerationResult {
                outcome: self.outcome.clone(),
                elapsed: self.elapsed,
                model: "fake".to_string(),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for FakeBackend {
        fn model(&self) -> &str {
            "fake"
        }

        fn base_url(&self) -> &str {
            "http://fake"
        }

        async fn probe(&self) -> bool {
            self.available
        }

        async fn generate(&self, _message: &str, context: Option<&str>) -> GenerationResult {
            self.result(context)
        }

        async fn generate_stream(
            &self,
            _message: &str,
            context: Option<&str>,
            tx: mpsc::Sender<StreamEvent>,
        ) -> GenerationResult {
            let result = self.result(context);
            match &result.outcome {
                GenerationOutcome::Success(text) => {
                    for word in text.split_inclusive(' ') {
                        let _ = tx.send(StreamEvent::TextDelta(word.to_string())).await;
                    }
                    let _ = tx.send(StreamEvent::Done).await;
                }
                GenerationOutcome::Failure(error) => {
                    let _ = tx.send(StreamEvent::Error(error.clone())).await;
                }
            }
            result
        }
    }

    pub(crate) async fn test_pipeline(
        backend: Arc<FakeBackend>,
    ) -> (tempfile::TempDir, Arc<ConversationStore>, Arc<ChatPipeline>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).await.unwrap();
        let pipeline = ChatPipeline::with_rng(store.clone(), backend, StdRng::seed_from_u64(1));
        (dir, store, pipeline)
    }

    #[tokio::test]
    async fn greeting_with_backend_down_uses_fallback() {
        let backend = FakeBackend::down();
        let (_dir, store, pipeline) = test_pipeline(backend.clone()).await;

        let outcome = pipeline.send_message(1, None, "bonjour").await.unwrap();

        assert_eq!(
            outcome.assistant_message.content,
            "Bonjour ! Bienvenue sur BTP Connect. Comment puis-je vous aider ?"
        );
        assert_eq!(outcome.processing_time, 0.1);
        assert_eq!(outcome.assistant_message.processing_time, Some(0.1));
        assert!(outcome.assistant_message.is_processed);
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);

        let stored = store.messages(outcome.conversation_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].sender, Sender::User);
        assert_eq!(stored[0].content, "bonjour");
        assert_eq!(stored[1].sender, Sender::Assistant);
    }

    #[tokio::test]
    async fn cement_with_backend_down_names_suppliers() {
        let (_dir, _store, pipeline) = test_pipeline(FakeBackend::down()).await;

        let outcome = pipeline.send_message(1, None, "ciment").await.unwrap();
        assert_eq!(
            outcome.assistant_message.content,
            "Ciment disponible : SOCOCIM Industries, Ciments du Sahel. Livraison partout au Sénégal."
        );
    }

    #[tokio::test]
    async fn backend_reply_is_persisted_with_its_latency() {
        let backend = FakeBackend::replying("Le ciment coûte 4 500 FCFA le sac.", 1500);
        let (_dir, _store, pipeline) = test_pipeline(backend.clone()).await;

        let outcome = pipeline.send_message(1, None, "prix ciment").await.unwrap();
        assert_eq!(
            outcome.assistant_message.content,
            "Le ciment coûte 4 500 FCFA le sac."
        );
        assert_eq!(outcome.processing_time, 1.5);
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_with_failed_latency() {
        let backend = FakeBackend::failing("HTTP error 500", 2000);
        let (_dir, store, pipeline) = test_pipeline(backend.clone()).await;

        let outcome = pipeline.send_message(1, None, "livraison ?").await.unwrap();
        assert_eq!(
            outcome.assistant_message.content,
            "Délais : 24h à 72h selon votre localisation. Express pour Dakar."
        );
        assert_eq!(outcome.processing_time, 2.0);
        assert_eq!(
            store.messages(outcome.conversation_id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn empty_backend_reply_falls_back_to_canned_answer() {
        let backend = FakeBackend::failing("empty response", 40);
        let (_dir, store, pipeline) = test_pipeline(backend.clone()).await;

        let outcome = pipeline.send_message(1, None, "ciment").await.unwrap();
        assert_eq!(
            outcome.assistant_message.content,
            "Ciment disponible : SOCOCIM Industries, Ciments du Sahel. Livraison partout au Sénégal."
        );
        assert_eq!(outcome.processing_time, 0.04);
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);

        let stored = store.messages(outcome.conversation_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test]
    async fn context_is_last_five_messages_oldest_first() {
        let backend = FakeBackend::replying("ok", 10);
        let (_dir, _store, pipeline) = test_pipeline(backend.clone()).await;

        let first = pipeline.send_message(1, None, "un").await.unwrap();
        let id = Some(first.conversation_id);
        pipeline.send_message(1, id, "deux").await.unwrap();
        pipeline.send_message(1, id, "trois").await.unwrap();
        pipeline.send_message(1, id, "quatre").await.unwrap();

        let context = backend.last_context.lock().unwrap().clone().unwrap();
        assert_eq!(
            context,
            "user: deux\nassistant: ok\nuser: trois\nassistant: ok\nuser: quatre"
        );
    }

    #[tokio::test]
    async fn send_without_id_creates_then_send_with_id_appends() {
        let (_dir, store, pipeline) = test_pipeline(FakeBackend::down()).await;

        let first = pipeline.send_message(9, None, "bonjour").await.unwrap();
        let second = pipeline
            .send_message(9, Some(first.conversation_id), "ciment")
            .await
            .unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(store.list_active(9).await.unwrap().len(), 1);
        assert_eq!(
            store.messages(first.conversation_id).await.unwrap().len(),
            4
        );
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_side_effects() {
        let (_dir, store, pipeline) = test_pipeline(FakeBackend::down()).await;

        let err = pipeline.send_message(2, None, "   \n").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(store.list_active(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_or_inactive_conversation_is_not_found() {
        let (_dir, store, pipeline) = test_pipeline(FakeBackend::down()).await;
        let owned = store.create_conversation(1, None).await.unwrap();

        let err = pipeline
            .send_message(2, Some(owned.id), "bonjour")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));

        store.deactivate(owned.id, 1).await.unwrap();
        let err = pipeline
            .send_message(1, Some(owned.id), "bonjour")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
        assert!(store.messages(owned.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn streaming_forwards_backend_fragments() {
        let backend = FakeBackend::replying("Livraison sous 48h.", 300);
        let (_dir, _store, pipeline) = test_pipeline(backend).await;

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = pipeline
            .send_message_streaming(1, None, "livraison", tx)
            .await
            .unwrap();

        let mut deltas = String::new();
        let mut completed = None;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Delta(fragment) => deltas.push_str(&fragment),
                PipelineEvent::Completed(done) => completed = Some(done),
            }
        }
        assert_eq!(deltas, "Livraison sous 48h.");
        let completed = completed.unwrap();
        assert_eq!(completed.assistant_message.id, outcome.assistant_message.id);
        assert_eq!(completed.assistant_message.content, "Livraison sous 48h.");
    }

    #[tokio::test]
    async fn streaming_with_backend_down_sends_fallback_once() {
        let (_dir, _store, pipeline) = test_pipeline(FakeBackend::down()).await;

        let (tx, mut rx) = mpsc::channel(16);
        pipeline
            .send_message_streaming(1, None, "bonjour", tx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            PipelineEvent::Delta(ref text) if text.starts_with("Bonjour ! Bienvenue")
        ));
        assert!(matches!(rx.recv().await, Some(PipelineEvent::Completed(_))));
        assert!(rx.recv().await.is_none());
    }
}
