use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ModelQueue, QueueError, QueueMessageHandle, QueuedJob, Result};
use crate::types_jobs::ModelJob;

struct Message {
    id: Uuid,
    job: ModelJob,
    visible_at: Instant,
    pop_receipt: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub job: ModelJob,
    pub reason: String,
}

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    dead_letters: Vec<DeadLetter>,
}

impl Inner {
    fn held(&self, handle: &QueueMessageHandle) -> Result<usize> {
        self.messages
            .iter()
            .position(|m| m.id == handle.message_id && m.pop_receipt.is_some() && m.pop_receipt == handle.pop_receipt)
            .ok_or(QueueError::StaleHandle(handle.message_id))
    }
}

/// Process-local queue for tests and single-process setups. Nothing survives
/// a restart.
pub struct InMemoryModelQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl InMemoryModelQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Messages not yet acknowledged or dead-lettered, hidden ones included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl ModelQueue for InMemoryModelQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &ModelJob) -> Result<QueueMessageHandle> {
        let id = Uuid::new_v4();
        let mut job = job.clone();
        job.dequeue_count = 0;

        self.inner.lock().await.messages.push(Message {
            id,
            job,
            visible_at: Instant::now(),
            pop_receipt: None,
        });

        Ok(QueueMessageHandle { message_id: id, pop_receipt: None })
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> Result<Option<QueuedJob>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let Some(msg) = inner.messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4();
        msg.pop_receipt = Some(receipt);
        msg.visible_at = now + visibility_timeout;
        msg.job.dequeue_count += 1;

        Ok(Some(QueuedJob {
            job: msg.job.clone(),
            handle: QueueMessageHandle { message_id: msg.id, pop_receipt: Some(receipt) },
        }))
    }

    async fn acknowledge(&self, handle: &QueueMessageHandle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = inner.held(handle)?;
        inner.messages.remove(idx);
        Ok(())
    }

    async fn release(&self, handle: &QueueMessageHandle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = inner.held(handle)?;
        let msg = &mut inner.messages[idx];
        msg.visible_at = Instant::now();
        msg.pop_receipt = None;
        Ok(())
    }

    async fn dead_letter(&self, handle: &QueueMessageHandle, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = inner.held(handle)?;
        let msg = inner.messages.remove(idx);
        inner.dead_letters.push(DeadLetter {
            message_id: msg.id,
            job: msg.job,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIS: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_dequeue_hides_message() {
        let q = InMemoryModelQueue::new("train");
        q.enqueue(&ModelJob::train(Uuid::new_v4())).await.unwrap();

        let first = q.dequeue(VIS).await.unwrap().unwrap();
        assert_eq!(first.job.dequeue_count, 1);
        assert!(q.dequeue(VIS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unacknowledged_message_is_redelivered() {
        let q = InMemoryModelQueue::new("train");
        q.enqueue(&ModelJob::train(Uuid::new_v4())).await.unwrap();

        let first = q.dequeue(Duration::from_millis(20)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = q.dequeue(VIS).await.unwrap().unwrap();

        assert_eq!(first.handle.message_id, second.handle.message_id);
        assert_eq!(second.job.dequeue_count, 2);

        // first delivery's receipt no longer settles the message
        let err = q.acknowledge(&first.handle).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleHandle(_)));
        q.acknowledge(&second.handle).await.unwrap();
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_release_makes_visible_again() {
        let q = InMemoryModelQueue::new("delete");
        q.enqueue(&ModelJob::delete(Uuid::new_v4())).await.unwrap();

        let first = q.dequeue(VIS).await.unwrap().unwrap();
        q.release(&first.handle).await.unwrap();

        let second = q.dequeue(VIS).await.unwrap().unwrap();
        assert_eq!(second.job.dequeue_count, 2);
        assert!(q.release(&first.handle).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_letter_removes_from_circulation() {
        let q = InMemoryModelQueue::new("train");
        let id = Uuid::new_v4();
        q.enqueue(&ModelJob::train(id)).await.unwrap();

        let msg = q.dequeue(VIS).await.unwrap().unwrap();
        q.dead_letter(&msg.handle, "too many attempts").await.unwrap();

        assert!(q.is_empty().await);
        let dead = q.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.model_id, id);
        assert_eq!(dead[0].reason, "too many attempts");
    }

    #[tokio::test]
    async fn test_enqueue_handle_cannot_settle() {
        let q = InMemoryModelQueue::new("train");
        let handle = q.enqueue(&ModelJob::train(Uuid::new_v4())).await.unwrap();
        assert!(q.acknowledge(&handle).await.is_err());
    }
}
