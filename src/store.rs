use crate::entity::{conversations, messages};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const DB_FILE: &str = "chat.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Sender::User),
            "assistant" => Ok(Sender::Assistant),
            other => Err(anyhow!("Unknown message sender: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<conversations::Model> for Conversation {
    fn from(r: conversations::Model) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            is_active: r.is_active,
            created_at: from_micros(r.created_us),
            updated_at: from_micros(r.updated_us),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    #[serde(skip)]
    pub conversation_id: i64,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_processed: bool,
    pub processing_time: Option<f64>,
}

impl TryFrom<messages::Model> for Message {
    type Error = anyhow::Error;

    fn try_from(r: messages::Model) -> Result<Self> {
        Ok(Self {
            id: r.id,
            conversation_id: r.conversation_id,
            sender: r.sender.parse()?,
            content: r.content,
            timestamp: from_micros(r.timestamp_us),
            is_processed: r.is_processed,
            processing_time: r.processing_time,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Sender,
    pub content: String,
    pub is_processed: bool,
    pub processing_time: Option<f64>,
}

impl NewMessage {
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            is_processed: false,
            processing_time: None,
        }
    }

    pub fn from_assistant(content: impl Into<String>, processing_time: f64) -> Self {
        Self {
            sender: Sender::Assistant,
            content: content.into(),
            is_processed: true,
            processing_time: Some(processing_time),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub is_active: Option<bool>,
}

pub fn default_title(now: DateTime<Utc>) -> String {
    format!("Conversation {}", now.format("%d/%m/%Y %H:%M"))
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn into_messages(rows: Vec<messages::Model>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

/// SQLite-backed conversations and messages.
///
/// Ordering and cascade are explicit: messages sort by `(timestamp, id)` and
/// `delete_conversation` removes the messages itself.
pub struct ConversationStore {
    db_url: String,
}

impl ConversationStore {
    pub async fn new(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;
        let db_path = data_dir.join(DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<()> {
                let db = Database::connect(&db_url)?;

                db.get_schema_builder()
                    .register(conversations::Entity)
                    .register(messages::Entity)
                    .apply(&db)?;

                Ok(())
            }
        })
        .await??;

        info!("Conversation store ready ({})", db_path.display());
        Ok(Arc::new(Self { db_url }))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DatabaseConnection) -> Result<T> + Send + 'static,
    {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let db = Database::connect(&db_url).context("Failed to open chat database")?;
            f(&db)
        })
        .await
        .context("Store task panicked")?
    }

    pub async fn create_conversation(
        &self,
        user_id: i64,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let now_us = now.timestamp_micros();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_title(now));

        let record = conversations::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            title: Set(title.clone()),
            is_active: Set(true),
            created_us: Set(now_us),
            updated_us: Set(now_us),
        };

        let id = self
            .with_db(move |db| {
                let result = conversations::Entity::insert(record).exec(db)?;
                Ok(result.last_insert_id)
            })
            .await?;

        info!("Created conversation {} for user {}", id, user_id);
        Ok(Conversation {
            id,
            user_id,
            title,
            is_active: true,
            created_at: from_micros(now_us),
            updated_at: from_micros(now_us),
        })
    }

    pub async fn list_active(&self, user_id: i64) -> Result<Vec<Conversation>> {
        self.with_db(move |db| {
            let rows = conversations::Entity::find()
                .filter(conversations::Column::UserId.eq(user_id))
                .filter(conversations::Column::IsActive.eq(true))
                .order_by_desc(conversations::Column::UpdatedUs)
                .order_by_desc(conversations::Column::Id)
                .all(db)?;

            Ok(rows.into_iter().map(Conversation::from).collect())
        })
        .await
    }

    /// Looks up a conversation owned by `user_id`, active or not.
    pub async fn get_for_user(&self, id: i64, user_id: i64) -> Result<Option<Conversation>> {
        self.with_db(move |db| {
            let row = conversations::Entity::find_by_id(id)
                .filter(conversations::Column::UserId.eq(user_id))
                .one(db)?;
            Ok(row.map(Conversation::from))
        })
        .await
    }

    pub async fn get_active_for_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .get_for_user(id, user_id)
            .await?
            .filter(|c| c.is_active))
    }

    pub async fn update_conversation(
        &self,
        id: i64,
        user_id: i64,
        update: ConversationUpdate,
    ) -> Result<Option<Conversation>> {
        self.with_db(move |db| {
            let Some(row) = conversations::Entity::find_by_id(id)
                .filter(conversations::Column::UserId.eq(user_id))
                .one(db)?
            else {
                return Ok(None);
            };

            let mut active = row.into_active_model();
            if let Some(title) = update.title {
                active.title = Set(title);
            }
            if let Some(is_active) = update.is_active {
                active.is_active = Set(is_active);
            }
            active.updated_us = Set(Utc::now().timestamp_micros());

            let updated = active.update(db)?;
            Ok(Some(Conversation::from(updated)))
        })
        .await
    }

    /// Soft delete. The conversation and its messages stay in the database.
    pub async fn deactivate(&self, id: i64, user_id: i64) -> Result<bool> {
        let affected = self
            .with_db(move |db| {
                let result = conversations::Entity::update_many()
                    .col_expr(conversations::Column::IsActive, Expr::value(false))
                    .col_expr(
                        conversations::Column::UpdatedUs,
                        Expr::value(Utc::now().timestamp_micros()),
                    )
                    .filter(conversations::Column::Id.eq(id))
                    .filter(conversations::Column::UserId.eq(user_id))
                    .exec(db)?;
                Ok(result.rows_affected)
            })
            .await?;

        if affected > 0 {
            info!("Deactivated conversation {}", id);
        }
        Ok(affected > 0)
    }

    /// Hard delete, removing the conversation's messages first.
    pub async fn delete_conversation(&self, id: i64) -> Result<bool> {
        let (removed_messages, affected) = self
            .with_db(move |db| {
                let txn = db.begin()?;
                let removed = messages::Entity::delete_many()
                    .filter(messages::Column::ConversationId.eq(id))
                    .exec(&txn)?;
                let result = conversations::Entity::delete_many()
                    .filter(conversations::Column::Id.eq(id))
                    .exec(&txn)?;
                txn.commit()?;
                Ok((removed.rows_affected, result.rows_affected))
            })
            .await?;

        if affected > 0 {
            info!(
                "Deleted conversation {} and {} message(s)",
                id, removed_messages
            );
        }
        Ok(affected > 0)
    }

    pub async fn messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        self.with_db(move |db| {
            let rows = messages::Entity::find()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .order_by_asc(messages::Column::TimestampUs)
                .order_by_asc(messages::Column::Id)
                .all(db)?;
            into_messages(rows)
        })
        .await
    }

    /// The newest `n` messages, oldest first.
    pub async fn recent_messages(&self, conversation_id: i64, n: usize) -> Result<Vec<Message>> {
        self.with_db(move |db| {
            let rows = messages::Entity::find()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .order_by_desc(messages::Column::TimestampUs)
                .order_by_desc(messages::Column::Id)
                .limit(n as u64)
                .all(db)?;

            let mut recent = into_messages(rows)?;
            recent.reverse();
            Ok(recent)
        })
        .await
    }

    pub async fn message_stats(&self, conversation_id: i64) -> Result<(u64, Option<Message>)> {
        self.with_db(move |db| {
            let count = messages::Entity::find()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .count(db)?;
            let last = messages::Entity::find()
                .filter(messages::Column::ConversationId.eq(conversation_id))
                .order_by_desc(messages::Column::TimestampUs)
                .order_by_desc(messages::Column::Id)
                .one(db)?
                .map(Message::try_from)
                .transpose()?;
            Ok((count, last))
        })
        .await
    }

    /// Inserts the message and touches the conversation in one transaction.
    pub async fn append_message(&self, conversation_id: i64, message: NewMessage) -> Result<Message> {
        let now_us = Utc::now().timestamp_micros();
        let record = messages::ActiveModel {
            id: NotSet,
            conversation_id: Set(conversation_id),
            sender: Set(message.sender.as_str().to_string()),
            content: Set(message.content.clone()),
            timestamp_us: Set(now_us),
            is_processed: Set(message.is_processed),
            processing_time: Set(message.processing_time),
        };

        let id = self
            .with_db(move |db| {
                let txn = db.begin()?;
                let result = messages::Entity::insert(record).exec(&txn)?;
                let touched = conversations::Entity::update_many()
                    .col_expr(conversations::Column::UpdatedUs, Expr::value(now_us))
                    .filter(conversations::Column::Id.eq(conversation_id))
                    .exec(&txn)?;
                if touched.rows_affected == 0 {
                    anyhow::bail!("Conversation {} does not exist", conversation_id);
                }
                txn.commit()?;
                Ok(result.last_insert_id)
            })
            .await?;

        Ok(Message {
            id,
            conversation_id,
            sender: message.sender,
            content: message.content,
            timestamp: from_micros(now_us),
            is_processed: message.is_processed,
            processing_time: message.processing_time,
        })
    }
}
