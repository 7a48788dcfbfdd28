use std::sync::Arc;

use parsing::FileParser;
use registry::ModelRegistry;

use crate::model_store::ModelStore;
use crate::processor::{JobProcessor, ProcessorSettings};
use crate::queue::ModelQueue;
use crate::submit::Submitter;
use crate::trainer::Trainer;
use crate::worker_loop::PoolSettings;

pub type SharedState = Arc<AppState>;

/// Everything the workers share, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub train_queue: Arc<dyn ModelQueue>,
    pub delete_queue: Arc<dyn ModelQueue>,
    pub registry: Arc<dyn ModelRegistry>,
    pub store: Arc<dyn ModelStore>,
    pub processor: Arc<JobProcessor>,
    pub pool: PoolSettings,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        train_queue: Arc<dyn ModelQueue>,
        delete_queue: Arc<dyn ModelQueue>,
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn ModelStore>,
        trainer: Arc<dyn Trainer>,
        parser: Arc<dyn FileParser>,
        settings: ProcessorSettings,
        pool: PoolSettings,
    ) -> Self {
        let processor = Arc::new(JobProcessor::new(
            registry.clone(),
            store.clone(),
            trainer,
            parser,
            settings,
        ));
        Self {
            train_queue,
            delete_queue,
            registry,
            store,
            processor,
            pool,
        }
    }

    pub fn submitter(&self) -> Submitter {
        Submitter::new(
            self.train_queue.clone(),
            self.delete_queue.clone(),
            self.registry.clone(),
            self.store.clone(),
        )
    }
}
