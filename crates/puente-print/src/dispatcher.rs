// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job dispatcher.
//
// Accepts job descriptions into a bounded FIFO queue and runs them one at a
// time on a single worker task:
//
//   submit → Pending → (worker) Executing → Completed | Failed
//                    ↘ (cancel / pending timeout / shutdown) Cancelled
//
// A second task sweeps the queue for jobs that waited longer than the pending
// timeout. Status changes go through the `StatusRegistry`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use puente_bridge::PrinterDriver;
use puente_core::config::{BridgeConfig, QueueConfig};
use puente_core::error::{PuenteError, Result};
use puente_core::types::{Job, JobDescription, JobId, JobStatus};

use crate::connection::ConnectionManager;
use crate::encoder::Encoder;
use crate::registry::StatusRegistry;

/// How often the sweeper looks for expired pending jobs, at most.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for the sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct QueuedJob {
    id: JobId,
    description: Arc<JobDescription>,
    enqueued_at: Instant,
}

struct Shared<D: PrinterDriver> {
    queue: Mutex<VecDeque<QueuedJob>>,
    /// Signalled when a job is enqueued.
    wake: Notify,
    next_id: AtomicU64,
    registry: Arc<StatusRegistry>,
    link: Arc<ConnectionManager<D>>,
    encoder: Encoder,
    queue_config: QueueConfig,
    acquire_timeout: Duration,
    max_qr_payload: usize,
    shutdown: watch::Sender<bool>,
}

/// Front door of the print engine.
pub struct Dispatcher<D: PrinterDriver> {
    shared: Arc<Shared<D>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: PrinterDriver> Dispatcher<D> {
    /// Build a dispatcher around an existing printer link. Call [`start`]
    /// to spawn the worker.
    ///
    /// [`start`]: Dispatcher::start
    pub fn new(config: &BridgeConfig, link: Arc<ConnectionManager<D>>, encoder: Encoder) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shared = Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.queue.capacity)),
            wake: Notify::new(),
            next_id: AtomicU64::new(1),
            registry: Arc::new(StatusRegistry::new(config.retention.clone())),
            link,
            encoder,
            queue_config: config.queue.clone(),
            acquire_timeout: config.link.acquire_timeout,
            max_qr_payload: config.encoder.max_qr_payload,
            shutdown,
        };
        Self {
            shared: Arc::new(shared),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker and the pending-timeout sweeper.
    pub fn start(&self) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return;
        }

        let worker = {
            let shared = self.shared.clone();
            let shutdown = self.shared.shutdown.subscribe();
            tokio::spawn(async move { shared.run_worker(shutdown).await })
        };
        let sweeper = {
            let shared = self.shared.clone();
            let shutdown = self.shared.shutdown.subscribe();
            tokio::spawn(async move { shared.run_sweeper(shutdown).await })
        };
        tasks.push(worker);
        tasks.push(sweeper);
        info!(
            capacity = self.shared.queue_config.capacity,
            endpoint = self.shared.link.endpoint(),
            "dispatcher started"
        );
    }

    /// Validate a job and append it to the queue.
    #[instrument(skip_all, fields(segments = description.segments().len()))]
    pub fn submit(&self, description: JobDescription) -> Result<JobId> {
        let shared = &self.shared;
        if *shared.shutdown.borrow() {
            return Err(PuenteError::ShuttingDown);
        }
        description.validate(shared.max_qr_payload)?;
        shared
            .encoder
            .check_images(&description)
            .map_err(|e| PuenteError::Validation(e.to_string()))?;
        let description = Arc::new(description);

        let id = {
            let mut queue = shared.queue();
            if queue.len() >= shared.queue_config.capacity {
                warn!(capacity = shared.queue_config.capacity, "queue full, job rejected");
                return Err(PuenteError::QueueFull {
                    capacity: shared.queue_config.capacity,
                });
            }
            let id = JobId(shared.next_id.fetch_add(1, Ordering::Relaxed));
            shared.registry.insert(Job::new(id, description.clone()));
            queue.push_back(QueuedJob {
                id,
                description,
                enqueued_at: Instant::now(),
            });
            id
        };

        shared.wake.notify_one();
        info!(job_id = %id, "job accepted");
        Ok(id)
    }

    /// Remove a pending job from the queue.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let shared = &self.shared;
        let mut queue = shared.queue();

        if let Some(pos) = queue.iter().position(|queued| queued.id == id) {
            queue.remove(pos);
            let job = shared
                .registry
                .transition(id, JobStatus::Cancelled, Some("cancelled by caller".into()))
                .ok_or(PuenteError::NotFound(id))?;
            info!(job_id = %id, "job cancelled");
            return Ok(job);
        }

        // Not queued: it is executing, finished, or unknown. The worker moves
        // jobs to Executing under the queue lock, so this view is consistent.
        let job = shared.registry.get(id)?;
        Err(PuenteError::NotCancellable {
            id,
            status: job.status,
        })
    }

    pub fn status(&self, id: JobId) -> Result<Job> {
        self.shared.registry.get(id)
    }

    /// Wait until a job reaches a terminal status.
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        self.shared.registry.wait(id).await
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.shared.registry
    }

    pub fn link(&self) -> &Arc<ConnectionManager<D>> {
        &self.shared.link
    }

    pub fn encoder(&self) -> &Encoder {
        &self.shared.encoder
    }

    /// Stop accepting jobs, cancel what is still queued, let the executing
    /// job finish, then close the printer link.
    pub async fn shutdown(&self) {
        info!("dispatcher shutting down");
        self.shared.shutdown.send_replace(true);

        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatcher task panicked");
            }
        }

        self.shared.cancel_all("dispatcher shut down");
        self.shared.link.shutdown().await;
    }
}

impl<D: PrinterDriver> Shared<D> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        lock(&self.queue)
    }

    /// Pop the oldest live job and mark it Executing. Expired jobs found on
    /// the way are cancelled.
    fn take_next(&self) -> Option<QueuedJob> {
        let mut queue = self.queue();
        while let Some(job) = queue.pop_front() {
            if job.enqueued_at.elapsed() >= self.queue_config.pending_timeout {
                self.expire(&job);
                continue;
            }
            if self
                .registry
                .transition(job.id, JobStatus::Executing, None)
                .is_some()
            {
                return Some(job);
            }
        }
        None
    }

    fn expire(&self, job: &QueuedJob) {
        warn!(job_id = %job.id, "pending timeout, job cancelled");
        self.registry.transition(
            job.id,
            JobStatus::Cancelled,
            Some(format!(
                "pending timeout: not dispatched within {}ms",
                self.queue_config.pending_timeout.as_millis()
            )),
        );
    }

    fn cancel_all(&self, reason: &str) {
        let mut queue = self.queue();
        for job in queue.drain(..) {
            self.registry
                .transition(job.id, JobStatus::Cancelled, Some(reason.to_string()));
        }
    }

    async fn run_worker(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.take_next() {
                Some(job) => self.execute(job).await,
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        debug!("worker stopped");
    }

    async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let period = SWEEP_INTERVAL
            .min(self.queue_config.pending_timeout)
            .max(MIN_SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = shutdown.changed() => break,
            }
        }
        debug!("sweeper stopped");
    }

    fn sweep(&self) {
        let timeout = self.queue_config.pending_timeout;
        let mut queue = self.queue();
        let mut kept = VecDeque::with_capacity(queue.len());
        for job in queue.drain(..) {
            if job.enqueued_at.elapsed() >= timeout {
                self.expire(&job);
            } else {
                kept.push_back(job);
            }
        }
        *queue = kept;
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn execute(&self, job: QueuedJob) {
        debug!("encoding job");
        let frames = match self.encoder.encode(&job.description) {
            Ok(frames) => frames,
            Err(e) => {
                self.fail(job.id, format!("encoding: {e}"));
                return;
            }
        };

        let mut lease = match self.link.acquire(self.acquire_timeout).await {
            Ok(lease) => lease,
            Err(e) => {
                self.fail(job.id, e.to_string());
                return;
            }
        };

        let total = frames.len();
        for (index, frame) in frames.iter().enumerate() {
            if let Err(e) = lease.write(frame.as_bytes()).await {
                let reason = format!("frame {} of {total}: {e}", index + 1);
                self.link.report_failure(lease, &e);
                self.fail(job.id, reason);
                return;
            }
        }
        self.link.release(lease);

        self.registry.transition(job.id, JobStatus::Completed, None);
        info!(frames = total, "job completed");
    }

    fn fail(&self, id: JobId, reason: String) {
        error!(job_id = %id, %reason, "job failed");
        self.registry.transition(id, JobStatus::Failed, Some(reason));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
