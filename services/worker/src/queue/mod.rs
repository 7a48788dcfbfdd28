//! Durable work queues for model jobs.
//!
//! Delivery is at-least-once: a dequeued message stays hidden for its
//! visibility timeout and reappears unless it is acknowledged, released or
//! dead-lettered first. Every delivery gets a fresh pop receipt and only the
//! holder of the latest receipt may settle the message.

mod memory;
mod postgres;

pub use memory::{DeadLetter, InMemoryModelQueue};
pub use postgres::PgModelQueue;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types_jobs::ModelJob;

pub const TRAIN_QUEUE: &str = "train";
pub const DELETE_QUEUE: &str = "delete";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessageHandle {
    pub message_id: Uuid,
    /// Set on delivery; `None` for a handle returned by `enqueue`.
    pub pop_receipt: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: ModelJob,
    pub handle: QueueMessageHandle,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message {0} is no longer held by this receipt")]
    StaleHandle(Uuid),

    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("invalid message {id}: {reason}")]
    InvalidMessage { id: Uuid, reason: String },
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[async_trait]
pub trait ModelQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, job: &ModelJob) -> Result<QueueMessageHandle>;

    /// Next visible message, hidden from other consumers for `visibility_timeout`.
    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>>;

    /// Remove the message for good.
    async fn acknowledge(&self, handle: &QueueMessageHandle) -> Result<()>;

    /// Make the message visible again right away.
    async fn release(&self, handle: &QueueMessageHandle) -> Result<()>;

    /// Move the message out of normal circulation.
    async fn dead_letter(&self, handle: &QueueMessageHandle, reason: &str) -> Result<()>;
}
