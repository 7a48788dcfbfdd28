use std::sync::Arc;

use bytes::Bytes;
use registry::{ModelEntry, ModelId, ModelRegistry, ModelStatus, RegistryError};
use thiserror::Error;
use tracing::info;

use crate::model_store::{ModelStore, StoreError};
use crate::queue::{ModelQueue, QueueError, QueueMessageHandle};
use crate::types_jobs::ModelJob;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("model {model_id} was already processed (status {status:?})")]
    AlreadyProcessed { model_id: ModelId, status: ModelStatus },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Producer side of the pipeline: uploads input, registers models and puts
/// jobs on the queues.
#[derive(Clone)]
pub struct Submitter {
    train_queue: Arc<dyn ModelQueue>,
    delete_queue: Arc<dyn ModelQueue>,
    registry: Arc<dyn ModelRegistry>,
    store: Arc<dyn ModelStore>,
}

impl Submitter {
    pub fn new(
        train_queue: Arc<dyn ModelQueue>,
        delete_queue: Arc<dyn ModelQueue>,
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn ModelStore>,
    ) -> Self {
        Self { train_queue, delete_queue, registry, store }
    }

    pub async fn upload_dataset(&self, model_id: ModelId, data: Bytes) -> Result<(), SubmitError> {
        let size = data.len();
        self.store.put_input_dataset(model_id, data).await?;
        info!(model_id=%model_id, bytes = size, "submit: dataset uploaded");
        Ok(())
    }

    /// Register the model as `New` and queue it for training.
    ///
    /// Re-submitting a model that is still `New` only queues another message;
    /// the claim step drops the extra delivery.
    pub async fn submit_train(&self, model_id: ModelId) -> Result<(QueueMessageHandle, ModelEntry), SubmitError> {
        let entry = self.registry.get_or_create(model_id).await?;
        if entry.status != ModelStatus::New {
            return Err(SubmitError::AlreadyProcessed { model_id, status: entry.status });
        }
        let handle = self.train_queue.enqueue(&ModelJob::train(model_id)).await?;
        info!(model_id=%model_id, message_id=%handle.message_id, "submit: train queued");
        Ok((handle, entry))
    }

    pub async fn submit_delete(&self, model_id: ModelId) -> Result<QueueMessageHandle, SubmitError> {
        let handle = self.delete_queue.enqueue(&ModelJob::delete(model_id)).await?;
        info!(model_id=%model_id, message_id=%handle.message_id, "submit: delete queued");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_store::InMemoryModelStore;
    use crate::queue::{InMemoryModelQueue, DELETE_QUEUE, TRAIN_QUEUE};
    use crate::types_jobs::ModelOperation;
    use registry::{InMemoryModelRegistry, StatusUpdate};
    use std::time::Duration;
    use uuid::Uuid;

    fn submitter() -> (Submitter, Arc<InMemoryModelQueue>, Arc<InMemoryModelQueue>, Arc<InMemoryModelRegistry>) {
        let train = Arc::new(InMemoryModelQueue::new(TRAIN_QUEUE));
        let delete = Arc::new(InMemoryModelQueue::new(DELETE_QUEUE));
        let registry = Arc::new(InMemoryModelRegistry::new());
        let s = Submitter::new(train.clone(), delete.clone(), registry.clone(), Arc::new(InMemoryModelStore::new()));
        (s, train, delete, registry)
    }

    #[tokio::test]
    async fn test_submit_train_registers_and_enqueues() {
        let (s, train, _, registry) = submitter();
        let id = Uuid::new_v4();

        let (_, entry) = s.submit_train(id).await.unwrap();
        assert_eq!(entry.status, ModelStatus::New);
        assert!(registry.get(id).await.unwrap().is_some());

        let queued = train.dequeue(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(queued.job.model_id, id);
        assert_eq!(queued.job.operation, ModelOperation::Train);
    }

    #[tokio::test]
    async fn test_submit_train_rejects_processed_model() {
        let (s, train, _, registry) = submitter();
        let id = Uuid::new_v4();
        registry.get_or_create(id).await.unwrap();
        registry
            .update_status(id, StatusUpdate::Failed { owner: "w".into(), error_message: "bad".into() })
            .await
            .unwrap();

        let err = s.submit_train(id).await.unwrap_err();
        assert!(matches!(err, SubmitError::AlreadyProcessed { status: ModelStatus::Failed, .. }));
        assert!(train.is_empty().await);
    }

    #[tokio::test]
    async fn test_submit_delete_uses_delete_queue() {
        let (s, train, delete, _) = submitter();
        s.submit_delete(Uuid::new_v4()).await.unwrap();
        assert!(train.is_empty().await);
        assert_eq!(delete.len().await, 1);
    }
}
