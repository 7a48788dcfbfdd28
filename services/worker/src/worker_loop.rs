use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::processor::JobProcessor;
use crate::queue::ModelQueue;
use crate::state::SharedState;

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub train_workers: usize,
    pub delete_workers: usize,
    pub poll_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            train_workers: 2,
            delete_workers: 1,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Run the worker pool until `cancel` fires and every worker has stopped.
///
/// Train and delete queues get their own workers so short deletes never wait
/// behind long training runs.
pub async fn run_worker_pool(state: SharedState, cancel: CancellationToken) {
    let pool = state.pool.clone();
    let mut workers = JoinSet::new();

    for i in 0..pool.train_workers {
        workers.spawn(run_worker(
            format!("train-{i}"),
            state.train_queue.clone(),
            state.processor.clone(),
            pool.poll_interval,
            cancel.clone(),
        ));
    }
    for i in 0..pool.delete_workers {
        workers.spawn(run_worker(
            format!("delete-{i}"),
            state.delete_queue.clone(),
            state.processor.clone(),
            pool.poll_interval,
            cancel.clone(),
        ));
    }
    info!(train = pool.train_workers, delete = pool.delete_workers, "worker_pool: started");

    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!("worker task failed: {e:?}");
        }
    }
    info!("worker_pool: stopped");
}

async fn run_worker(
    name: String,
    queue: Arc<dyn ModelQueue>,
    processor: Arc<JobProcessor>,
    poll_every: Duration,
    cancel: CancellationToken,
) {
    info!(worker=%name, queue=%queue.name(), "worker: started");
    let visibility = processor.settings().visibility_timeout;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            r = queue.dequeue(visibility) => r,
        };

        match next {
            Ok(Some(queued)) => {
                let outcome = processor.process(queue.as_ref(), queued, &cancel).await;
                debug!(worker=%name, ?outcome, "worker: job settled");
            }
            Ok(None) => idle(poll_every, &cancel).await,
            Err(e) => {
                warn!(worker=%name, "worker: dequeue failed: {e}");
                idle(poll_every, &cancel).await;
            }
        }
    }

    info!(worker=%name, "worker: stopped");
}

async fn idle(every: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(every) => {}
    }
}
