//! Job processing: one dequeued message from claim to settlement.
//!
//! Stages per job:
//! 1. poison check on the delivery count
//! 2. claim the registry entry (train only); a `Conflict` means another
//!    delivery already owns or finished the model, so the message is dropped
//! 3. run the operation under the processing timeout, racing shutdown
//! 4. record the outcome in the registry, then settle the message
//!
//! The registry write always happens before the queue is settled, so a crash
//! between the two leaves a redelivery that the claim step turns into a no-op.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parsing::{create_parsing_report, FileParser, ParseError, ParsingReport};
use registry::{ModelId, ModelRegistry, RegistryError, StatusUpdate};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::model_store::{ModelStore, StoreError};
use crate::queue::{ModelQueue, QueueMessageHandle, QueuedJob};
use crate::trace::JobTrace;
use crate::trainer::{TrainError, Trainer};
use crate::types_jobs::ModelOperation;

#[derive(Clone, Debug)]
pub struct ProcessorSettings {
    /// Prefix of the owner recorded on claimed registry entries.
    pub worker_id: String,
    pub visibility_timeout: Duration,
    /// Also the registry lease; must be shorter than `visibility_timeout` so
    /// a redelivered message always finds the previous claim expired.
    pub processing_timeout: Duration,
    pub max_dequeue_count: u32,
    pub min_successful_lines: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            worker_id: "model-worker".to_string(),
            visibility_timeout: Duration::from_secs(3600),
            processing_timeout: Duration::from_secs(3300),
            max_dequeue_count: 5,
            min_successful_lines: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Infrastructure trouble; another attempt may succeed.
    #[error("{0}")]
    Transient(String),

    /// The input itself is unusable; retrying will not help.
    #[error("{0}")]
    Unrecoverable(String),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }
}

impl From<StoreError> for ProcessingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ProcessingError::Unrecoverable(format!("input dataset for model {id} not found")),
            StoreError::Io(_) => ProcessingError::Transient(e.to_string()),
        }
    }
}

impl From<TrainError> for ProcessingError {
    fn from(e: TrainError) -> Self {
        match e {
            TrainError::Io(_) => ProcessingError::Transient(e.to_string()),
            TrainError::Rejected(_) => ProcessingError::Unrecoverable(e.to_string()),
        }
    }
}

impl From<ParseError> for ProcessingError {
    fn from(e: ParseError) -> Self {
        ProcessingError::Unrecoverable(format!("corrupt input file: {e}"))
    }
}

impl From<RegistryError> for ProcessingError {
    fn from(e: RegistryError) -> Self {
        ProcessingError::Transient(e.to_string())
    }
}

/// How a message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Processed and acknowledged.
    Acknowledged,
    /// Duplicate delivery; acknowledged without processing.
    Skipped,
    /// Handed back to the queue for another attempt.
    Released,
    DeadLettered,
    /// Shutdown mid-job; left for the visibility timeout to recover.
    Abandoned,
}

enum Processed {
    Trained(ParsingReport),
    Deleted,
}

pub struct JobProcessor {
    registry: Arc<dyn ModelRegistry>,
    store: Arc<dyn ModelStore>,
    trainer: Arc<dyn Trainer>,
    parser: Arc<dyn FileParser>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn ModelStore>,
        trainer: Arc<dyn Trainer>,
        parser: Arc<dyn FileParser>,
        settings: ProcessorSettings,
    ) -> Self {
        Self { registry, store, trainer, parser, settings }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub async fn process(&self, queue: &dyn ModelQueue, queued: QueuedJob, cancel: &CancellationToken) -> JobOutcome {
        let trace = JobTrace::new(queue.name(), &queued);
        let span = trace.span().clone();
        self.process_traced(queue, &queued, cancel, &trace).instrument(span).await
    }

    async fn process_traced(
        &self,
        queue: &dyn ModelQueue,
        queued: &QueuedJob,
        cancel: &CancellationToken,
        trace: &JobTrace,
    ) -> JobOutcome {
        let job = &queued.job;
        let owner = self.owner_for(queued);
        trace.verbose(&format!("job dequeued by {owner}"));

        if job.dequeue_count > self.settings.max_dequeue_count {
            let msg = format!(
                "exceeded maximum delivery attempts ({} > {})",
                job.dequeue_count, self.settings.max_dequeue_count
            );
            trace.error(&msg);
            return self.fail_and_dead_letter(queue, queued, &owner, &msg, trace).await;
        }

        if job.operation == ModelOperation::Train {
            match self.claim(job.model_id, &owner).await {
                Ok(()) => trace.verbose("model claimed"),
                Err(RegistryError::Conflict { status, .. }) => {
                    let why = if status.is_terminal() { "already finished" } else { "held by another delivery" };
                    trace.information(&format!("model is {status:?} ({why}); dropping redundant delivery"));
                    return self.acknowledge(queue, &queued.handle, JobOutcome::Skipped, trace).await;
                }
                Err(e) => {
                    trace.warning(&format!("could not claim model: {e}"));
                    return self.release(queue, &queued.handle, trace).await;
                }
            }
        }

        let timeout = self.settings.processing_timeout;
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                trace.information("shutdown requested; abandoning job");
                return JobOutcome::Abandoned;
            }
            r = tokio::time::timeout(timeout, self.execute(job.model_id, job.operation)) => match r {
                Ok(r) => r,
                Err(_) => Err(ProcessingError::Transient(format!("processing timed out after {timeout:?}"))),
            },
        };

        match result {
            Ok(processed) => self.finalize_success(queue, queued, &owner, processed, trace).await,
            Err(e) => self.finalize_failure(queue, queued, &owner, e, trace).await,
        }
    }

    /// Unique per delivery, so two deliveries of one model never share a claim.
    fn owner_for(&self, queued: &QueuedJob) -> String {
        let delivery = queued.handle.pop_receipt.unwrap_or(queued.handle.message_id);
        format!("{}/{}", self.settings.worker_id, delivery)
    }

    async fn claim(&self, model_id: ModelId, owner: &str) -> Result<(), RegistryError> {
        self.registry.get_or_create(model_id).await?;
        self.registry
            .update_status(
                model_id,
                StatusUpdate::InProgress {
                    owner: owner.to_string(),
                    lease: self.settings.processing_timeout,
                },
            )
            .await?;
        Ok(())
    }

    async fn execute(&self, model_id: ModelId, operation: ModelOperation) -> Result<Processed, ProcessingError> {
        match operation {
            ModelOperation::Train => self.train(model_id).await.map(Processed::Trained),
            ModelOperation::Delete => {
                self.delete(model_id).await?;
                Ok(Processed::Deleted)
            }
        }
    }

    async fn train(&self, model_id: ModelId) -> Result<ParsingReport, ProcessingError> {
        let data = self.store.get_input_dataset(model_id).await?;

        let parser = self.parser.clone();
        let input = data.clone();
        let started = Instant::now();
        let file_report = tokio::task::spawn_blocking(move || parser.parse(&mut Cursor::new(&input[..])))
            .await
            .map_err(|e| ProcessingError::Transient(format!("parser task failed: {e}")))??;
        let duration = started.elapsed();

        debug!(
            successful = file_report.successful_lines_count,
            errors = file_report.errors.len(),
            warnings = file_report.warnings.len(),
            "input parsed"
        );

        if file_report.successful_lines_count < self.settings.min_successful_lines {
            return Err(ProcessingError::Unrecoverable(format!(
                "input has {} valid lines, at least {} required ({} errors, {} warnings)",
                file_report.successful_lines_count,
                self.settings.min_successful_lines,
                file_report.errors.len(),
                file_report.warnings.len(),
            )));
        }

        let artifact = self.trainer.train(model_id, data).await?;
        let destination = self.store.put_model_artifact(model_id, artifact).await?;

        Ok(create_parsing_report(&file_report, duration, Some(destination)))
    }

    async fn delete(&self, model_id: ModelId) -> Result<(), ProcessingError> {
        match self.store.delete_model(model_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        match self.registry.delete(model_id).await {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn finalize_success(
        &self,
        queue: &dyn ModelQueue,
        queued: &QueuedJob,
        owner: &str,
        processed: Processed,
        trace: &JobTrace,
    ) -> JobOutcome {
        let model_id = queued.job.model_id;
        let report = match processed {
            Processed::Deleted => {
                trace.information("model deleted");
                return self.acknowledge(queue, &queued.handle, JobOutcome::Acknowledged, trace).await;
            }
            Processed::Trained(report) => report,
        };

        let lines = report.successful_lines_count;
        let update = StatusUpdate::Completed { owner: owner.to_string(), report: Some(report) };
        match self.registry.update_status(model_id, update).await {
            Ok(_) => {
                trace.information(&format!("training completed ({lines} lines)"));
                self.acknowledge(queue, &queued.handle, JobOutcome::Acknowledged, trace).await
            }
            Err(RegistryError::Conflict { status, .. }) => {
                trace.warning(&format!("lost ownership before completion (now {status:?}); discarding result"));
                self.acknowledge(queue, &queued.handle, JobOutcome::Skipped, trace).await
            }
            Err(RegistryError::NotFound(_)) => {
                // Deleted while training; the artifact just written belongs to nothing.
                trace.warning("model deleted during training; discarding result");
                match self.store.delete_model(model_id).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => trace.warning(&format!("could not remove orphaned artifact: {e}")),
                }
                self.acknowledge(queue, &queued.handle, JobOutcome::Skipped, trace).await
            }
            Err(e) => {
                trace.error(&format!("could not record completion: {e}"));
                self.release(queue, &queued.handle, trace).await
            }
        }
    }

    async fn finalize_failure(
        &self,
        queue: &dyn ModelQueue,
        queued: &QueuedJob,
        owner: &str,
        err: ProcessingError,
        trace: &JobTrace,
    ) -> JobOutcome {
        let job = &queued.job;
        let msg = err.to_string();

        if !err.is_retryable() {
            trace.error(&format!("job failed: {msg}"));
            return match self.record_failure(job.model_id, owner, &msg).await {
                Ok(()) => self.acknowledge(queue, &queued.handle, JobOutcome::Acknowledged, trace).await,
                Err(e) => {
                    trace.error(&format!("could not record failure: {e}"));
                    self.release(queue, &queued.handle, trace).await
                }
            };
        }

        if job.dequeue_count >= self.settings.max_dequeue_count {
            let msg = format!("giving up after {} attempts: {msg}", job.dequeue_count);
            trace.error(&msg);
            return self.fail_and_dead_letter(queue, queued, owner, &msg, trace).await;
        }

        trace.warning(&format!("attempt {} failed, will retry: {msg}", job.dequeue_count));
        if job.operation == ModelOperation::Train {
            let reset = StatusUpdate::Reset { owner: owner.to_string() };
            match self.registry.update_status(job.model_id, reset).await {
                Ok(_) | Err(RegistryError::Conflict { .. }) | Err(RegistryError::NotFound(_)) => {}
                Err(e) => trace.warning(&format!("could not reset model for retry: {e}")),
            }
        }
        self.release(queue, &queued.handle, trace).await
    }

    /// `Failed` unless the entry is gone or already settled elsewhere.
    async fn record_failure(&self, model_id: ModelId, owner: &str, error_message: &str) -> Result<(), RegistryError> {
        let update = StatusUpdate::Failed {
            owner: owner.to_string(),
            error_message: error_message.to_string(),
        };
        match self.registry.update_status(model_id, update).await {
            Ok(_) | Err(RegistryError::Conflict { .. }) | Err(RegistryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fail_and_dead_letter(
        &self,
        queue: &dyn ModelQueue,
        queued: &QueuedJob,
        owner: &str,
        msg: &str,
        trace: &JobTrace,
    ) -> JobOutcome {
        // A failed delete says nothing about the model's training state.
        if queued.job.operation == ModelOperation::Train {
            if let Err(e) = self.record_failure(queued.job.model_id, owner, msg).await {
                trace.error(&format!("could not record failure: {e}"));
                return self.release(queue, &queued.handle, trace).await;
            }
        }
        match queue.dead_letter(&queued.handle, msg).await {
            Ok(()) => trace.information("message dead-lettered"),
            Err(e) => trace.warning(&format!("dead-letter failed: {e}")),
        }
        JobOutcome::DeadLettered
    }

    async fn acknowledge(
        &self,
        queue: &dyn ModelQueue,
        handle: &QueueMessageHandle,
        outcome: JobOutcome,
        trace: &JobTrace,
    ) -> JobOutcome {
        if let Err(e) = queue.acknowledge(handle).await {
            trace.warning(&format!("acknowledge failed: {e}"));
        }
        outcome
    }

    async fn release(&self, queue: &dyn ModelQueue, handle: &QueueMessageHandle, trace: &JobTrace) -> JobOutcome {
        if let Err(e) = queue.release(handle).await {
            trace.warning(&format!("release failed: {e}"));
        }
        JobOutcome::Released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_missing_dataset_is_unrecoverable() {
        let e: ProcessingError = StoreError::NotFound(Uuid::new_v4()).into();
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_store_io_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let e: ProcessingError = StoreError::Io(io).into();
        assert!(e.is_retryable());
    }

    #[test]
    fn test_trainer_rejection_is_unrecoverable() {
        let e: ProcessingError = TrainError::Rejected("no users".into()).into();
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("no users"));

        let spawn = std::io::Error::new(std::io::ErrorKind::NotFound, "python3");
        let e: ProcessingError = TrainError::Io(spawn).into();
        assert!(e.is_retryable());
    }

    #[test]
    fn test_registry_errors_are_transient() {
        let e: ProcessingError = RegistryError::Storage("pool timed out".into()).into();
        assert!(e.is_retryable());
    }
}
