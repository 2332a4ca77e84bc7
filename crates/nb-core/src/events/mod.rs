//! Progress event emission.
//!
//! Structured, JSONL-friendly events for machine consumers of the CLI and
//! for relaying [`QueueEvent`]s. [`EmitterProgress`] adapts any
//! [`ProgressEmitter`] to the batch engine's progress hook.

use crate::batch::{BatchProgress, BatchResult, FileResult, Operation};
use crate::queue::QueueEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

/// Standard progress event names.
pub mod event_names {
    pub const BATCH_STARTED: &str = "batch_started";
    pub const FILE_STARTED: &str = "file_started";
    pub const FILE_FINISHED: &str = "file_finished";
    pub const BATCH_COMPLETE: &str = "batch_complete";
    pub const BATCH_CANCELLED: &str = "batch_cancelled";

    pub const DISCOVERY_COMPLETE: &str = "discovery_complete";

    pub const JOB_STARTED: &str = "job_started";
    pub const JOB_PROGRESS: &str = "job_progress";
    pub const JOB_COMPLETE: &str = "job_complete";
    pub const JOB_CANCELLED: &str = "job_cancelled";
    pub const JOB_FAILED: &str = "job_failed";
    pub const QUEUE_EMPTY: &str = "queue_empty";
}

/// Pipeline phase of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discover,
    ExportPdf,
    ExportPackage,
    Import,
    Queue,
}

impl From<Operation> for Phase {
    fn from(op: Operation) -> Self {
        match op {
            Operation::ExportPdf => Phase::ExportPdf,
            Operation::ExportPackage => Phase::ExportPackage,
            Operation::Import => Phase::Import,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// One progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl ProgressEvent {
    pub fn new(event: impl Into<String>, phase: Phase) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            run_id: None,
            phase,
            progress: None,
            elapsed_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_progress(mut self, current: u64, total: Option<u64>) -> Self {
        self.progress = Some(Progress { current, total });
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    /// Summary event for a finished batch.
    pub fn batch_finished(result: &BatchResult) -> Self {
        let name = if result.cancelled {
            event_names::BATCH_CANCELLED
        } else {
            event_names::BATCH_COMPLETE
        };
        ProgressEvent::new(name, result.operation.into())
            .with_progress(result.total() as u64, Some(result.total() as u64))
            .with_elapsed_ms(result.elapsed_ms)
            .with_detail("succeeded", result.succeeded)
            .with_detail("skipped", result.skipped)
            .with_detail("failed", result.failed)
            .with_detail("outcome", result.outcome)
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

impl From<&QueueEvent> for ProgressEvent {
    fn from(event: &QueueEvent) -> Self {
        match event {
            QueueEvent::JobStarted {
                job_id,
                kind,
                total,
            } => ProgressEvent::new(event_names::JOB_STARTED, Phase::Queue)
                .with_progress(0, Some(*total as u64))
                .with_detail("job_id", job_id)
                .with_detail("kind", kind),
            QueueEvent::Progress {
                job_id,
                file,
                current,
                total,
                queued_jobs,
            } => ProgressEvent::new(event_names::JOB_PROGRESS, Phase::Queue)
                .with_progress(*current as u64, Some(*total as u64))
                .with_detail("job_id", job_id)
                .with_detail("file", file)
                .with_detail("queued_jobs", queued_jobs),
            QueueEvent::JobComplete {
                job_id,
                result,
                output_dir,
            } => ProgressEvent::new(event_names::JOB_COMPLETE, Phase::Queue)
                .with_elapsed_ms(result.elapsed_ms)
                .with_detail("job_id", job_id)
                .with_detail("succeeded", result.succeeded)
                .with_detail("skipped", result.skipped)
                .with_detail("failed", result.failed)
                .with_detail("output_dir", output_dir),
            QueueEvent::JobCancelled { job_id, result } => {
                ProgressEvent::new(event_names::JOB_CANCELLED, Phase::Queue)
                    .with_elapsed_ms(result.elapsed_ms)
                    .with_detail("job_id", job_id)
                    .with_detail("succeeded", result.succeeded)
                    .with_detail("cancelled", result.cancelled_count)
            }
            QueueEvent::JobFailed { job_id, error } => {
                ProgressEvent::new(event_names::JOB_FAILED, Phase::Queue)
                    .with_detail("job_id", job_id)
                    .with_detail("error", error)
            }
            QueueEvent::QueueEmpty => ProgressEvent::new(event_names::QUEUE_EMPTY, Phase::Queue),
        }
    }
}

/// Sink for progress events.
pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Writes one JSON object per line.
pub struct JsonlWriter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> ProgressEmitter for JsonlWriter<W> {
    fn emit(&self, event: ProgressEvent) {
        let line = event.to_jsonl();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

/// Attaches the run id to events that lack one.
pub struct RunEmitter {
    run_id: String,
    inner: Arc<dyn ProgressEmitter>,
}

impl RunEmitter {
    pub fn new(run_id: impl Into<String>, inner: Arc<dyn ProgressEmitter>) -> Self {
        Self {
            run_id: run_id.into(),
            inner,
        }
    }
}

impl ProgressEmitter for RunEmitter {
    fn emit(&self, mut event: ProgressEvent) {
        if event.run_id.is_none() {
            event.run_id = Some(self.run_id.clone());
        }
        self.inner.emit(event);
    }
}

/// Batch progress hook that forwards to a [`ProgressEmitter`].
pub struct EmitterProgress<'a> {
    emitter: &'a dyn ProgressEmitter,
    phase: Phase,
}

impl<'a> EmitterProgress<'a> {
    pub fn new(emitter: &'a dyn ProgressEmitter, operation: Operation) -> Self {
        Self {
            emitter,
            phase: operation.into(),
        }
    }
}

impl BatchProgress for EmitterProgress<'_> {
    fn file_started(&mut self, name: &str, index: usize, total: usize) {
        self.emitter.emit(
            ProgressEvent::new(event_names::FILE_STARTED, self.phase)
                .with_progress(index as u64, Some(total as u64))
                .with_detail("file", name),
        );
    }

    fn file_finished(&mut self, index: usize, total: usize, result: &FileResult) -> ControlFlow<()> {
        let mut event = ProgressEvent::new(event_names::FILE_FINISHED, self.phase)
            .with_progress(index as u64, Some(total as u64))
            .with_elapsed_ms(result.elapsed_ms)
            .with_detail("file", result.display_name())
            .with_detail("status", result.status);
        if !result.message.is_empty() {
            event = event.with_detail("message", &result.message);
        }
        if let Some(output) = &result.output_path {
            event = event.with_detail("output", output);
        }
        self.emitter.emit(event);
        ControlFlow::Continue(())
    }
}
