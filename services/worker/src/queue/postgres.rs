use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ModelQueue, QueueError, QueueMessageHandle, QueuedJob, Result};
use crate::types_jobs::{ModelJob, ModelOperation};

/// Queue backed by the `model_queue_messages` table. Several logical queues
/// share the table, told apart by the `queue` column.
#[derive(Clone)]
pub struct PgModelQueue {
    pool: PgPool,
    name: String,
}

impl PgModelQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self { pool, name: name.into() }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    model_id: Uuid,
    operation: String,
    enqueue_time: DateTime<Utc>,
    dequeue_count: i32,
}

impl MessageRow {
    fn into_job(self, receipt: Uuid) -> Result<QueuedJob> {
        let operation = ModelOperation::parse(&self.operation).ok_or_else(|| QueueError::InvalidMessage {
            id: self.id,
            reason: format!("unknown operation: {}", self.operation),
        })?;

        Ok(QueuedJob {
            job: ModelJob {
                model_id: self.model_id,
                operation,
                enqueue_time: self.enqueue_time,
                dequeue_count: (self.dequeue_count + 1).max(0) as u32,
            },
            handle: QueueMessageHandle { message_id: self.id, pop_receipt: Some(receipt) },
        })
    }
}

fn receipt_of(handle: &QueueMessageHandle) -> Result<Uuid> {
    handle.pop_receipt.ok_or(QueueError::StaleHandle(handle.message_id))
}

#[async_trait]
impl ModelQueue for PgModelQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &ModelJob) -> Result<QueueMessageHandle> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO model_queue_messages
              (id, queue, model_id, operation, enqueue_time, dequeue_count, visible_at)
            VALUES ($1, $2, $3, $4, $5, 0, NOW())
            "#
        )
        .bind(id)
        .bind(&self.name)
        .bind(job.model_id)
        .bind(job.operation.as_str())
        .bind(job.enqueue_time)
        .execute(&self.pool)
        .await?;

        Ok(QueueMessageHandle { message_id: id, pop_receipt: None })
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        // 1) One visible, live message; skip rows other consumers are claiming
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, model_id, operation, enqueue_time, dequeue_count
            FROM model_queue_messages
            WHERE queue = $1
              AND dead_lettered_at IS NULL
              AND visible_at <= NOW()
            ORDER BY enqueue_time ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        )
        .bind(&self.name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        // 2) Hide it and hand out a fresh receipt
        let receipt = Uuid::new_v4();
        sqlx::query(
            r#"
            UPDATE model_queue_messages
            SET
              visible_at = NOW() + make_interval(secs => $2),
              pop_receipt = $3,
              dequeue_count = dequeue_count + 1
            WHERE id = $1
            "#
        )
        .bind(row.id)
        .bind(visibility_timeout.as_secs_f64())
        .bind(receipt)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        row.into_job(receipt).map(Some)
    }

    async fn acknowledge(&self, handle: &QueueMessageHandle) -> Result<()> {
        let receipt = receipt_of(handle)?;
        let res = sqlx::query(r#"DELETE FROM model_queue_messages WHERE id = $1 AND pop_receipt = $2"#)
            .bind(handle.message_id)
            .bind(receipt)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::StaleHandle(handle.message_id));
        }
        Ok(())
    }

    async fn release(&self, handle: &QueueMessageHandle) -> Result<()> {
        let receipt = receipt_of(handle)?;
        let res = sqlx::query(
            r#"
            UPDATE model_queue_messages
            SET visible_at = NOW(), pop_receipt = NULL
            WHERE id = $1 AND pop_receipt = $2
            "#
        )
        .bind(handle.message_id)
        .bind(receipt)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::StaleHandle(handle.message_id));
        }
        Ok(())
    }

    async fn dead_letter(&self, handle: &QueueMessageHandle, reason: &str) -> Result<()> {
        let receipt = receipt_of(handle)?;
        let res = sqlx::query(
            r#"
            UPDATE model_queue_messages
            SET dead_lettered_at = NOW(),
                dead_letter_reason = $3,
                pop_receipt = NULL
            WHERE id = $1 AND pop_receipt = $2
            "#
        )
        .bind(handle.message_id)
        .bind(receipt)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::StaleHandle(handle.message_id));
        }
        Ok(())
    }
}
