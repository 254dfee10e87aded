// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job status registry.
//
// Holds a snapshot of every job from submission until its finished record is
// evicted. Finished jobs are kept for a retention window, bounded by a cap on
// the number of finished records. Waiters are woken through a watch channel
// whenever any job changes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use puente_core::config::RetentionConfig;
use puente_core::error::{PuenteError, Result};
use puente_core::types::{Job, JobId, JobStatus};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Finished jobs in completion order.
    finished: VecDeque<(JobId, Instant)>,
}

/// Authoritative view of job status for callers.
#[derive(Debug)]
pub struct StatusRegistry {
    inner: Mutex<Inner>,
    retention: RetentionConfig,
    /// Bumped on every status change.
    changes: watch::Sender<u64>,
}

impl StatusRegistry {
    pub fn new(retention: RetentionConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
            changes,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a newly accepted job.
    pub(crate) fn insert(&self, job: Job) {
        self.inner().jobs.insert(job.id, job);
        self.notify();
    }

    /// Move a job to `next`, if the lifecycle allows it. Returns the updated
    /// snapshot, or `None` when the job is unknown or the move would go
    /// backwards.
    pub(crate) fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        failure_reason: Option<String>,
    ) -> Option<Job> {
        let snapshot = {
            let mut inner = self.inner();
            let job = inner.jobs.get_mut(&id)?;
            if !job.status.can_transition_to(next) {
                warn!(job_id = %id, from = %job.status, to = %next, "rejected status transition");
                return None;
            }
            job.status = next;
            if next.is_terminal() {
                job.completed_at = Some(Utc::now());
                job.failure_reason = failure_reason;
            }
            let snapshot = job.clone();
            if next.is_terminal() {
                inner.finished.push_back((id, Instant::now()));
                self.evict(&mut inner);
            }
            snapshot
        };
        debug!(job_id = %id, status = %next, "job status changed");
        self.notify();
        Some(snapshot)
    }

    /// Current snapshot of a job. Evicted and unknown ids are `NotFound`.
    pub fn get(&self, id: JobId) -> Result<Job> {
        let mut inner = self.inner();
        self.evict(&mut inner);
        inner.jobs.get(&id).cloned().ok_or(PuenteError::NotFound(id))
    }

    pub fn executing_count(&self) -> usize {
        self.inner()
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Executing)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let mut changes = self.subscribe();
        loop {
            let job = self.get(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            changes
                .changed()
                .await
                .map_err(|_| PuenteError::ShuttingDown)?;
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn evict(&self, inner: &mut Inner) {
        let now = Instant::now();
        while let Some(&(id, finished_at)) = inner.finished.front() {
            let expired = now.duration_since(finished_at) >= self.retention.window;
            if !expired && inner.finished.len() <= self.retention.cap {
                break;
            }
            inner.finished.pop_front();
            inner.jobs.remove(&id);
            debug!(job_id = %id, "evicted finished job");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use puente_core::types::{JobDescription, Segment};

    use super::*;

    fn job(id: u64) -> Job {
        Job::new(JobId(id), JobDescription::new(vec![Segment::text("x")]))
    }

    fn finish(registry: &StatusRegistry, id: u64) {
        registry.transition(JobId(id), JobStatus::Executing, None);
        registry.transition(JobId(id), JobStatus::Completed, None);
    }

    fn registry(window_secs: u64, cap: usize) -> StatusRegistry {
        StatusRegistry::new(RetentionConfig {
            window: Duration::from_secs(window_secs),
            cap,
        })
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = registry(600, 10);
        assert!(matches!(
            registry.get(JobId(7)),
            Err(PuenteError::NotFound(JobId(7)))
        ));
    }

    #[test]
    fn transitions_are_monotonic() {
        let registry = registry(600, 10);
        registry.insert(job(1));
        assert!(registry.transition(JobId(1), JobStatus::Completed, None).is_none());
        assert!(registry.transition(JobId(1), JobStatus::Executing, None).is_some());
        assert_eq!(registry.executing_count(), 1);

        let failed = registry
            .transition(JobId(1), JobStatus::Failed, Some("paper out".into()))
            .expect("executing -> failed");
        assert_eq!(failed.failure_reason.as_deref(), Some("paper out"));
        assert!(failed.completed_at.is_some());
        assert!(registry.transition(JobId(1), JobStatus::Pending, None).is_none());
        assert_eq!(registry.get(JobId(1)).expect("still retained").status, JobStatus::Failed);
    }

    #[test]
    fn cap_evicts_oldest_finished() {
        let registry = registry(600, 2);
        for id in 1..=4 {
            registry.insert(job(id));
        }
        finish(&registry, 1);
        finish(&registry, 2);
        finish(&registry, 3);

        assert!(registry.get(JobId(1)).is_err());
        assert!(registry.get(JobId(2)).is_ok());
        assert!(registry.get(JobId(3)).is_ok());
        // Unfinished jobs are never evicted.
        assert!(registry.get(JobId(4)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_evicts_expired_records() {
        let registry = registry(60, 100);
        registry.insert(job(1));
        finish(&registry, 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get(JobId(1)).is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            registry.get(JobId(1)),
            Err(PuenteError::NotFound(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_returns_terminal_snapshot() {
        let registry = Arc::new(registry(600, 10));
        registry.insert(job(1));

        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait(JobId(1)).await }
        });
        tokio::task::yield_now().await;

        finish(&registry, 1);
        let job = waiter.await.expect("join").expect("wait");
        assert_eq!(job.status, JobStatus::Completed);
    }
}
