//! Background export queue.
//!
//! A [`JobQueue`] owns one worker thread and a FIFO of [`ExportJob`]s. Jobs
//! run strictly one at a time; per-file progress and results are sent back
//! over a bounded channel in the order they happen, so every event of a job
//! precedes every event of the job queued after it.
//!
//! ```text
//! Idle --enqueue--> Processing --queue drained--> Idle
//! Processing --cancel_all--> (current file finishes) --> Idle
//! ```

use crate::batch::{
    export_package_batch, export_pdf_batch, BatchProgress, BatchResult, ExportPackageOptions,
    ExportPdfOptions,
};
use crate::cancel::CancellationToken;
use crate::render::Rasterizer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, info, warn};

/// Identifier assigned to a job at enqueue time, starting at 1.
pub type JobId = u64;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One queued export request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportJob {
    Pdf {
        bundles: Vec<PathBuf>,
        options: ExportPdfOptions,
    },
    Package {
        bundles: Vec<PathBuf>,
        options: ExportPackageOptions,
    },
}

impl ExportJob {
    pub fn kind(&self) -> JobKind {
        match self {
            ExportJob::Pdf { .. } => JobKind::Pdf,
            ExportJob::Package { .. } => JobKind::Package,
        }
    }

    pub fn bundles(&self) -> &[PathBuf] {
        match self {
            ExportJob::Pdf { bundles, .. } | ExportJob::Package { bundles, .. } => bundles,
        }
    }

    fn output_dir(&self) -> PathBuf {
        match self {
            ExportJob::Pdf { options, .. } => options.output_or_default(),
            ExportJob::Package { options, .. } => options.output_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Pdf,
    Package,
}

/// Events delivered to the queue's owner.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    JobStarted {
        job_id: JobId,
        kind: JobKind,
        total: usize,
    },
    Progress {
        job_id: JobId,
        file: String,
        current: usize,
        total: usize,
        queued_jobs: usize,
    },
    JobComplete {
        job_id: JobId,
        result: BatchResult,
        output_dir: PathBuf,
    },
    /// The job observed cancellation; files finished before it are kept.
    JobCancelled {
        job_id: JobId,
        result: BatchResult,
    },
    /// The batch could not start (bad options, unwritable output directory).
    JobFailed {
        job_id: JobId,
        error: String,
    },
    QueueEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Idle,
    Processing,
}

/// Queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Events buffered before the worker waits for the receiver.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Pending {
    jobs: VecDeque<(JobId, ExportJob)>,
    processing: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    available: Condvar,
    cancel: CancellationToken,
    shutdown: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        // A panic while holding the lock leaves the queue itself consistent.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serial background executor for export jobs.
pub struct JobQueue {
    shared: Arc<Shared>,
    events: Receiver<QueueEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl JobQueue {
    /// Start the worker. Events are read through [`JobQueue::events`].
    ///
    /// The worker blocks while the event channel is full, so events should
    /// be drained while jobs run.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, config: QueueConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            available: Condvar::new(),
            cancel: CancellationToken::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("nb-export-worker".to_string())
            .spawn(move || {
                Worker {
                    shared: worker_shared,
                    rasterizer,
                    events: tx,
                }
                .run()
            })?;

        info!(capacity = config.event_capacity, "Export queue started");
        Ok(Self {
            shared,
            events: rx,
            worker: Some(worker),
        })
    }

    /// Progress and result events, in the order they happened.
    pub fn events(&self) -> &Receiver<QueueEvent> {
        &self.events
    }

    /// Queue a PDF export. Returns `None` for an empty bundle list.
    pub fn enqueue_pdf_export(
        &self,
        bundles: Vec<PathBuf>,
        options: ExportPdfOptions,
    ) -> Option<JobId> {
        self.enqueue(ExportJob::Pdf { bundles, options })
    }

    /// Queue a package export. Returns `None` for an empty bundle list.
    pub fn enqueue_package_export(
        &self,
        bundles: Vec<PathBuf>,
        options: ExportPackageOptions,
    ) -> Option<JobId> {
        self.enqueue(ExportJob::Package { bundles, options })
    }

    pub fn enqueue(&self, job: ExportJob) -> Option<JobId> {
        if job.bundles().is_empty() {
            debug!(kind = ?job.kind(), "Ignoring empty export job");
            return None;
        }
        let mut pending = self.shared.lock();
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(job_id = id, kind = ?job.kind(), files = job.bundles().len(), "Job enqueued");
        pending.jobs.push_back((id, job));
        self.shared.available.notify_one();
        Some(id)
    }

    /// Drop every queued job and stop the running one after its current file.
    pub fn cancel_all(&self) {
        let mut pending = self.shared.lock();
        let dropped = pending.jobs.len();
        pending.jobs.clear();
        if pending.processing {
            self.shared.cancel.cancel();
        }
        info!(dropped, running = pending.processing, "Export queue cancelled");
    }

    /// Jobs waiting behind the running one.
    pub fn queued_job_count(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn is_processing(&self) -> bool {
        self.state() == QueueState::Processing
    }

    pub fn state(&self) -> QueueState {
        let pending = self.shared.lock();
        if pending.processing || !pending.jobs.is_empty() {
            QueueState::Processing
        } else {
            QueueState::Idle
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        {
            let mut pending = self.shared.lock();
            pending.jobs.clear();
            self.shared.shutdown.store(true, Ordering::SeqCst);
            self.shared.cancel.cancel();
            self.shared.available.notify_all();
        }
        // a worker blocked on a full channel wakes up disconnected
        let (_, closed) = mpsc::sync_channel(0);
        drop(std::mem::replace(&mut self.events, closed));
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Export worker panicked");
            }
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    rasterizer: Arc<dyn Rasterizer>,
    events: SyncSender<QueueEvent>,
}

impl Worker {
    fn run(self) {
        while let Some((job_id, job)) = self.next_job() {
            self.process(job_id, job);

            let drained = {
                let mut pending = self.shared.lock();
                pending.processing = false;
                pending.jobs.is_empty()
            };
            if drained {
                self.send(QueueEvent::QueueEmpty);
            }
        }
        debug!("Export worker stopped");
    }

    /// Block until a job is available; `None` on shutdown.
    fn next_job(&self) -> Option<(JobId, ExportJob)> {
        let mut pending = self.shared.lock();
        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(next) = pending.jobs.pop_front() {
                pending.processing = true;
                // Reset under the lock so a concurrent cancel_all lands on this job.
                self.shared.cancel.reset();
                return Some(next);
            }
            pending = self
                .shared
                .available
                .wait(pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn process(&self, job_id: JobId, job: ExportJob) {
        let kind = job.kind();
        let total = job.bundles().len();
        let output_dir = job.output_dir();
        info!(job_id, ?kind, total, "Job started");
        self.send(QueueEvent::JobStarted {
            job_id,
            kind,
            total,
        });

        let mut progress = WorkerProgress {
            worker: self,
            job_id,
        };
        let outcome = match &job {
            ExportJob::Pdf { bundles, options } => export_pdf_batch(
                bundles,
                options,
                self.rasterizer.as_ref(),
                &mut progress,
                &self.shared.cancel,
            ),
            ExportJob::Package { bundles, options } => {
                export_package_batch(bundles, options, &mut progress, &self.shared.cancel)
            }
        };

        let event = match outcome {
            Ok(result) if result.cancelled => {
                info!(job_id, succeeded = result.succeeded, "Job cancelled");
                QueueEvent::JobCancelled { job_id, result }
            }
            Ok(result) => {
                info!(
                    job_id,
                    succeeded = result.succeeded,
                    skipped = result.skipped,
                    failed = result.failed,
                    "Job complete"
                );
                QueueEvent::JobComplete {
                    job_id,
                    result,
                    output_dir,
                }
            }
            Err(e) => {
                warn!(job_id, error = %e, "Job failed to start");
                QueueEvent::JobFailed {
                    job_id,
                    error: e.to_string(),
                }
            }
        };
        self.send(event);
    }

    /// Deliver an event, waiting while the channel is full.
    ///
    /// Fails only once the queue has been dropped.
    fn send(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver closed, dropping event");
        }
    }
}

struct WorkerProgress<'a> {
    worker: &'a Worker,
    job_id: JobId,
}

impl BatchProgress for WorkerProgress<'_> {
    fn file_started(&mut self, name: &str, index: usize, total: usize) {
        let queued_jobs = self.worker.shared.lock().jobs.len();
        self.worker.send(QueueEvent::Progress {
            job_id: self.job_id,
            file: name.to_string(),
            current: index,
            total,
            queued_jobs,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::AssetRasterizer;
    use std::time::Duration;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(AssetRasterizer), QueueConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_jobs_are_ignored() {
        let queue = queue();
        assert_eq!(
            queue.enqueue_pdf_export(Vec::new(), ExportPdfOptions::default()),
            None
        );
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.events().try_recv().is_err());
    }

    #[test]
    fn test_invalid_options_report_job_failed() {
        let queue = queue();
        let options = ExportPdfOptions {
            dpi: 0,
            ..Default::default()
        };
        let id = queue
            .enqueue_pdf_export(vec![PathBuf::from("/nowhere/A.snb")], options)
            .unwrap();

        let events: Vec<_> = queue.events().iter().take(3).collect();
        assert!(matches!(events[0], QueueEvent::JobStarted { job_id, .. } if job_id == id));
        assert!(matches!(events[1], QueueEvent::JobFailed { job_id, .. } if job_id == id));
        assert!(matches!(events[2], QueueEvent::QueueEmpty));
    }

    #[test]
    fn test_drop_releases_worker_blocked_on_full_channel() {
        let queue =
            JobQueue::new(Arc::new(AssetRasterizer), QueueConfig { event_capacity: 1 }).unwrap();
        let options = ExportPdfOptions {
            dpi: 0,
            ..Default::default()
        };
        queue
            .enqueue_pdf_export(vec![PathBuf::from("/nowhere/A.snb")], options)
            .unwrap();
        // JobStarted fills the channel; JobFailed is never read
        thread::sleep(Duration::from_millis(50));

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            drop(queue);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_job_ids_increase() {
        let queue = queue();
        queue.cancel_all();
        let a = queue
            .enqueue_package_export(vec![PathBuf::from("a")], ExportPackageOptions::default())
            .unwrap();
        let b = queue
            .enqueue_package_export(vec![PathBuf::from("b")], ExportPackageOptions::default())
            .unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(QueueEvent::QueueEmpty).unwrap();
        assert_eq!(json["event"], "queue_empty");
    }
}
