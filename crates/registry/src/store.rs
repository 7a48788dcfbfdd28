use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{ModelEntry, ModelId, ModelStatus, StatusUpdate};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model {model_id} is {status:?}; update rejected")]
    Conflict { model_id: ModelId, status: ModelStatus },

    #[error("model {0} not found")]
    NotFound(ModelId),

    #[error("registry storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Ser(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Source of truth for model lifecycle status.
///
/// `update_status` must be atomic per model id: concurrent callers racing on
/// the same id see exactly one winner, the rest get `Conflict`.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn get_or_create(&self, model_id: ModelId) -> Result<ModelEntry>;
    async fn get(&self, model_id: ModelId) -> Result<Option<ModelEntry>>;
    async fn update_status(&self, model_id: ModelId, update: StatusUpdate) -> Result<ModelEntry>;
    async fn delete(&self, model_id: ModelId) -> Result<()>;
    async fn list(&self) -> Result<Vec<ModelEntry>>;
}

/// Process-local registry. Every mutation runs under one write lock.
#[derive(Clone, Default)]
pub struct InMemoryModelRegistry {
    entries: Arc<RwLock<HashMap<ModelId, ModelEntry>>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn get_or_create(&self, model_id: ModelId) -> Result<ModelEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(model_id)
            .or_insert_with(|| ModelEntry::new(model_id, Utc::now()));
        Ok(entry.clone())
    }

    async fn get(&self, model_id: ModelId) -> Result<Option<ModelEntry>> {
        Ok(self.entries.read().await.get(&model_id).cloned())
    }

    async fn update_status(&self, model_id: ModelId, update: StatusUpdate) -> Result<ModelEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&model_id).ok_or(RegistryError::NotFound(model_id))?;
        entry.apply(&update, Utc::now())?;
        Ok(entry.clone())
    }

    async fn delete(&self, model_id: ModelId) -> Result<()> {
        match self.entries.write().await.remove(&model_id) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(model_id)),
        }
    }

    async fn list(&self) -> Result<Vec<ModelEntry>> {
        let mut out: Vec<ModelEntry> = self.entries.read().await.values().cloned().collect();
        out.sort_by_key(|e| e.created_time);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn claim(owner: &str) -> StatusUpdate {
        StatusUpdate::InProgress { owner: owner.to_string(), lease: Duration::from_secs(300) }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let reg = InMemoryModelRegistry::new();
        let id = Uuid::new_v4();

        let a = reg.get_or_create(id).await.unwrap();
        reg.update_status(id, claim("w1")).await.unwrap();
        let b = reg.get_or_create(id).await.unwrap();

        assert_eq!(a.status, ModelStatus::New);
        assert_eq!(b.status, ModelStatus::InProgress);
        assert_eq!(a.created_time, b.created_time);
    }

    #[tokio::test]
    async fn test_update_unknown_model_is_not_found() {
        let reg = InMemoryModelRegistry::new();
        let err = reg.update_status(Uuid::new_v4(), claim("w1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let reg = InMemoryModelRegistry::new();
        let id = Uuid::new_v4();
        reg.get_or_create(id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.update_status(id, claim(&format!("w{i}"))).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => winners += 1,
                Err(RegistryError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 15);
    }

    #[tokio::test]
    async fn test_delete() {
        let reg = InMemoryModelRegistry::new();
        let id = Uuid::new_v4();
        reg.get_or_create(id).await.unwrap();

        reg.delete(id).await.unwrap();
        assert!(reg.get(id).await.unwrap().is_none());
        assert!(matches!(reg.delete(id).await, Err(RegistryError::NotFound(_))));
    }
}
