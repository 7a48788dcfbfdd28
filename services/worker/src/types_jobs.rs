use chrono::{DateTime, Utc};
use registry::ModelId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelOperation {
    Train,
    Delete,
}

impl ModelOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelOperation::Train => "train",
            ModelOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "train" => Some(ModelOperation::Train),
            "delete" => Some(ModelOperation::Delete),
            _ => None,
        }
    }
}

/// A unit of work carried on a model queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelJob {
    pub model_id: ModelId,
    pub operation: ModelOperation,
    pub enqueue_time: DateTime<Utc>,
    /// Number of times this message has been handed to a worker, this
    /// delivery included.
    pub dequeue_count: u32,
}

impl ModelJob {
    pub fn new(model_id: ModelId, operation: ModelOperation) -> Self {
        Self {
            model_id,
            operation,
            enqueue_time: Utc::now(),
            dequeue_count: 0,
        }
    }

    pub fn train(model_id: ModelId) -> Self {
        Self::new(model_id, ModelOperation::Train)
    }

    pub fn delete(model_id: ModelId) -> Self {
        Self::new(model_id, ModelOperation::Delete)
    }
}
