// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection manager for the single printer link.
//
// Owns the driver handle and hands out exclusive leases on it. The manager is
// the only component that opens, probes, or closes the device. Reconnects use
// exponential backoff; a health probe runs before a lease is granted whenever
// the last check is older than the configured interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;
use tracing::{debug, info, instrument, warn};

use puente_bridge::{Probe, PrinterDriver};
use puente_core::config::LinkConfig;
use puente_core::error::{PuenteError, Result};
use puente_core::types::{LinkState, LinkStatus};

use crate::backoff::compute_delay;
use crate::health::LinkHealth;

/// Exclusive right to write to the printer.
///
/// Hand it back with [`ConnectionManager::release`] after a clean job, or
/// [`ConnectionManager::report_failure`] after a failed write.
pub struct LinkLease<'a, D: PrinterDriver> {
    driver: &'a D,
    slot: AsyncMutexGuard<'a, Option<D::Handle>>,
}

impl<D: PrinterDriver> LinkLease<'_, D> {
    /// Write one frame to the printer.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let handle = self
            .slot
            .as_mut()
            .ok_or_else(|| PuenteError::LinkUnavailable("lease has no open connection".into()))?;
        self.driver.write(handle, bytes).await
    }
}

/// Shared custody of the printer link.
pub struct ConnectionManager<D: PrinterDriver> {
    driver: D,
    endpoint: String,
    config: LinkConfig,
    /// Open handle. Holding the lock is holding the lease.
    slot: AsyncMutex<Option<D::Handle>>,
    /// Never held across an await.
    health: Mutex<LinkHealth>,
    closed: AtomicBool,
}

impl<D: PrinterDriver> ConnectionManager<D> {
    pub fn new(driver: D, config: LinkConfig) -> Self {
        let endpoint = driver.endpoint();
        let health = LinkHealth::new(config.failure_threshold);
        Self {
            driver,
            endpoint,
            config,
            slot: AsyncMutex::new(None),
            health: Mutex::new(health),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn health(&self) -> MutexGuard<'_, LinkHealth> {
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a healthy connection is available and take exclusive use
    /// of it, or fail with `LinkUnavailable` once `timeout` elapses.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn acquire(&self, timeout: Duration) -> Result<LinkLease<'_, D>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PuenteError::ShuttingDown);
        }

        match tokio::time::timeout(timeout, self.acquire_healthy()).await {
            Ok(lease) => Ok(lease),
            Err(_) => {
                let mut health = self.health();
                health.abandon_connecting();
                let reason = match health.snapshot().last_error {
                    Some(e) => format!(
                        "no healthy connection within {}ms (last error: {e})",
                        timeout.as_millis()
                    ),
                    None => format!("no healthy connection within {}ms", timeout.as_millis()),
                };
                warn!(%reason, "link acquire timed out");
                Err(PuenteError::LinkUnavailable(reason))
            }
        }
    }

    /// Loop until the link is Connected and healthy. Cancel-safe: dropping
    /// the future releases the slot.
    async fn acquire_healthy(&self) -> LinkLease<'_, D> {
        let mut slot = self.slot.lock().await;
        let mut attempt = 0u32;

        loop {
            let (state, check_due) = {
                let health = self.health();
                (
                    health.state(),
                    health.check_due(self.config.health_check_interval),
                )
            };

            if state == LinkState::Connected {
                if let Some(handle) = slot.as_mut() {
                    if !check_due {
                        return LinkLease {
                            driver: &self.driver,
                            slot,
                        };
                    }
                    let probe = self.driver.probe(handle).await;
                    debug!(?probe, "health check");
                    self.health().record_probe(probe);
                    if probe == Probe::Healthy {
                        return LinkLease {
                            driver: &self.driver,
                            slot,
                        };
                    }
                    continue;
                }
            }

            // Disconnected, Degraded, or a stale handle: start over.
            if let Some(stale) = slot.take() {
                debug!("closing stale connection");
                self.driver.close(stale).await;
            }

            self.health().begin_connecting();
            match self.driver.open().await {
                Ok(handle) => {
                    *slot = Some(handle);
                    self.health().connected();
                    attempt = 0;
                }
                Err(e) => {
                    self.health().connect_failed(&e.to_string());
                    let delay = compute_delay(attempt, &self.config.backoff);
                    attempt = attempt.saturating_add(1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Return the lease after a job finished without a write failure. The
    /// connection stays open.
    pub fn release(&self, lease: LinkLease<'_, D>) {
        self.health().record_success();
        drop(lease);
    }

    /// Return the lease after a write failed. Once the failure streak reaches
    /// the threshold the link is Degraded and the next acquire reconnects.
    pub fn report_failure(&self, lease: LinkLease<'_, D>, error: &PuenteError) {
        self.health().record_failure(&error.to_string());
        drop(lease);
    }

    /// Non-blocking: never waits for the lease holder.
    pub fn is_healthy(&self) -> bool {
        self.health().state() == LinkState::Connected
    }

    pub fn link_status(&self) -> LinkStatus {
        self.health().snapshot()
    }

    /// Refuse new leases, wait for the current holder, then close the link.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.take() {
            self.driver.close(handle).await;
        }
        self.health().disconnected();
        info!(endpoint = %self.endpoint, "printer link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puente_bridge::MemoryDriver;
    use puente_core::config::BackoffConfig;

    fn config(threshold: u32) -> LinkConfig {
        LinkConfig {
            failure_threshold: threshold,
            backoff: BackoffConfig {
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn first_acquire_connects() {
        let driver = MemoryDriver::new();
        let manager = ConnectionManager::new(driver.clone(), config(1));
        assert!(!manager.is_healthy());

        let mut lease = manager.acquire(TIMEOUT).await.expect("acquire");
        lease.write(b"hello").await.expect("write");
        manager.release(lease);

        assert!(manager.is_healthy());
        assert_eq!(driver.opens(), 1);
        // A fresh connection needs no probe.
        assert_eq!(driver.probes(), 0);
        assert_eq!(driver.printed(), b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff() {
        let driver = MemoryDriver::new();
        driver.fail_next_opens(2);
        let manager = ConnectionManager::new(driver.clone(), config(1));

        let start = tokio::time::Instant::now();
        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        manager.release(lease);

        assert_eq!(driver.opens(), 3);
        // 200ms + 400ms of backoff.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(600), "waited {waited:?}");
        assert!(waited < Duration::from_millis(700), "waited {waited:?}");
        assert_eq!(manager.link_status().state, LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_printer_is_link_unavailable() {
        let driver = MemoryDriver::new();
        driver.set_offline(true);
        let manager = ConnectionManager::new(driver.clone(), config(1));

        let err = manager.acquire(Duration::from_secs(2)).await.err().expect("must fail");
        assert!(matches!(err, PuenteError::LinkUnavailable(_)));
        assert!(driver.opens() > 1);

        let status = manager.link_status();
        assert_eq!(status.state, LinkState::Disconnected);
        assert_eq!(status.last_error.as_deref(), Some("printer driver error: printer is offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn degrades_after_threshold_and_reconnects_before_next_lease() {
        let driver = MemoryDriver::new();
        let manager = ConnectionManager::new(driver.clone(), config(3));
        driver.fail_next_writes(3);

        for round in 1..=3u32 {
            let mut lease = manager.acquire(TIMEOUT).await.expect("acquire");
            let err = lease.write(b"frame").await.err().expect("write fails");
            manager.report_failure(lease, &err);
            assert_eq!(driver.opens(), 1, "no reconnect after failure {round}");
            assert_eq!(manager.link_status().consecutive_failure_count, round);
        }
        assert_eq!(manager.link_status().state, LinkState::Degraded);
        assert!(!manager.is_healthy());

        let mut lease = manager.acquire(TIMEOUT).await.expect("acquire");
        assert_eq!(driver.opens(), 2);
        assert_eq!(driver.closes(), 1);
        lease.write(b"ok").await.expect("write");
        manager.release(lease);

        assert_eq!(driver.writes().last().map(|w| w.session), Some(2));
        assert_eq!(manager.link_status().consecutive_failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_link_is_probed_before_lease() {
        let driver = MemoryDriver::new();
        let manager = ConnectionManager::new(driver.clone(), config(1));

        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        manager.release(lease);

        tokio::time::advance(Duration::from_secs(31)).await;
        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        manager.release(lease);
        assert_eq!(driver.probes(), 1);
        assert_eq!(driver.opens(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        driver.fail_next_probes(1);
        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        manager.release(lease);
        assert_eq!(driver.probes(), 2);
        assert_eq!(driver.opens(), 2, "unhealthy probe forces a reconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_exclusive() {
        let driver = MemoryDriver::new();
        let manager = ConnectionManager::new(driver, config(1));

        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        // Status queries never block on the holder.
        assert!(manager.is_healthy());
        assert!(matches!(
            manager.acquire(Duration::from_millis(50)).await,
            Err(PuenteError::LinkUnavailable(_))
        ));
        manager.release(lease);
        assert!(manager.acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_link_and_refuses_leases() {
        let driver = MemoryDriver::new();
        let manager = ConnectionManager::new(driver.clone(), config(1));
        let lease = manager.acquire(TIMEOUT).await.expect("acquire");
        manager.release(lease);

        manager.shutdown().await;
        assert_eq!(driver.closes(), 1);
        assert_eq!(manager.link_status().state, LinkState::Disconnected);
        assert!(matches!(
            manager.acquire(TIMEOUT).await,
            Err(PuenteError::ShuttingDown)
        ));
    }
}
