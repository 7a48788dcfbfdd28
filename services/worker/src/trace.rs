use tracing::{debug, error, info, info_span, warn, Span};

use crate::queue::QueuedJob;

/// Per-attempt trace context: which queue, message and model a log line
/// belongs to.
#[derive(Clone, Debug)]
pub struct JobTrace {
    span: Span,
}

impl JobTrace {
    pub fn new(queue: &str, queued: &QueuedJob) -> Self {
        let span = info_span!(
            "model_job",
            queue = %queue,
            message_id = %queued.handle.message_id,
            model_id = %queued.job.model_id,
            operation = queued.job.operation.as_str(),
            dequeue_count = queued.job.dequeue_count,
        );
        Self { span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn verbose(&self, message: &str) {
        self.span.in_scope(|| debug!("{message}"));
    }

    pub fn information(&self, message: &str) {
        self.span.in_scope(|| info!("{message}"));
    }

    pub fn warning(&self, message: &str) {
        self.span.in_scope(|| warn!("{message}"));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| error!("{message}"));
    }
}
