use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use registry::ModelId;
use thiserror::Error;
use tokio::sync::RwLock;

const INPUT_FILE: &str = "input.csv";
const ARTIFACT_FILE: &str = "model.bin";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored data for model {0}")]
    NotFound(ModelId),

    #[error("model store IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable home of model input datasets and trained artifacts.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get_input_dataset(&self, model_id: ModelId) -> Result<Bytes>;
    async fn put_input_dataset(&self, model_id: ModelId, data: Bytes) -> Result<()>;
    /// Returns where the artifact was written.
    async fn put_model_artifact(&self, model_id: ModelId, artifact: Bytes) -> Result<String>;
    async fn delete_model(&self, model_id: ModelId) -> Result<()>;
}

/// One directory per model under `root`: `<root>/<model_id>/{input.csv,model.bin}`.
#[derive(Clone, Debug)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn model_dir(&self, model_id: ModelId) -> PathBuf {
        self.root.join(model_id.to_string())
    }

    // tmp file + rename, so readers never see a half-written file
    async fn write_atomic(&self, model_id: ModelId, file: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.model_dir(model_id);
        tokio::fs::create_dir_all(&dir).await?;

        let tmp_path = dir.join(format!("tmp_{}_{file}", uuid::Uuid::new_v4()));
        let final_path = dir.join(file);
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path)
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn get_input_dataset(&self, model_id: ModelId) -> Result<Bytes> {
        match tokio::fs::read(self.model_dir(model_id).join(INPUT_FILE)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(model_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_input_dataset(&self, model_id: ModelId, data: Bytes) -> Result<()> {
        self.write_atomic(model_id, INPUT_FILE, &data).await?;
        Ok(())
    }

    async fn put_model_artifact(&self, model_id: ModelId, artifact: Bytes) -> Result<String> {
        let path = self.write_atomic(model_id, ARTIFACT_FILE, &artifact).await?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn delete_model(&self, model_id: ModelId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.model_dir(model_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(model_id)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store that keeps everything in memory, for tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryModelStore {
    datasets: Arc<RwLock<HashMap<ModelId, Bytes>>>,
    artifacts: Arc<RwLock<HashMap<ModelId, Bytes>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn artifact(&self, model_id: ModelId) -> Option<Bytes> {
        self.artifacts.read().await.get(&model_id).cloned()
    }

    pub async fn has_dataset(&self, model_id: ModelId) -> bool {
        self.datasets.read().await.contains_key(&model_id)
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get_input_dataset(&self, model_id: ModelId) -> Result<Bytes> {
        self.datasets
            .read()
            .await
            .get(&model_id)
            .cloned()
            .ok_or(StoreError::NotFound(model_id))
    }

    async fn put_input_dataset(&self, model_id: ModelId, data: Bytes) -> Result<()> {
        self.datasets.write().await.insert(model_id, data);
        Ok(())
    }

    async fn put_model_artifact(&self, model_id: ModelId, artifact: Bytes) -> Result<String> {
        self.artifacts.write().await.insert(model_id, artifact);
        Ok(format!("memory://{model_id}/{ARTIFACT_FILE}"))
    }

    async fn delete_model(&self, model_id: ModelId) -> Result<()> {
        let had_dataset = self.datasets.write().await.remove(&model_id).is_some();
        let had_artifact = self.artifacts.write().await.remove(&model_id).is_some();
        if had_dataset || had_artifact {
            Ok(())
        } else {
            Err(StoreError::NotFound(model_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_delete() {
        let root = std::env::temp_dir().join(format!("model-store-{}", Uuid::new_v4()));
        let store = FsModelStore::new(&root);
        let id = Uuid::new_v4();

        assert!(matches!(store.get_input_dataset(id).await, Err(StoreError::NotFound(_))));

        store.put_input_dataset(id, Bytes::from_static(b"u1,i1,2024-01-01T00:00:00\n")).await.unwrap();
        let data = store.get_input_dataset(id).await.unwrap();
        assert_eq!(&data[..], b"u1,i1,2024-01-01T00:00:00\n");

        let dest = store.put_model_artifact(id, Bytes::from_static(b"weights")).await.unwrap();
        assert!(dest.ends_with(ARTIFACT_FILE));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"weights");

        store.delete_model(id).await.unwrap();
        assert!(matches!(store.delete_model(id).await, Err(StoreError::NotFound(_))));

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing() {
        let store = InMemoryModelStore::new();
        assert!(matches!(store.delete_model(Uuid::new_v4()).await, Err(StoreError::NotFound(_))));
    }
}
