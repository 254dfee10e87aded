// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer link health tracking.
//
// Records the link state machine (Disconnected → Connecting → Connected →
// Degraded → Connecting ...) together with the failure streak and the time of
// the last health check. The record is plain data; the connection manager
// drives it and does the I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use puente_bridge::Probe;
use puente_core::types::{LinkState, LinkStatus};

/// Health record for the single printer link.
#[derive(Debug, Clone)]
pub struct LinkHealth {
    state: LinkState,
    consecutive_failures: u32,
    /// Failures in a row before the link is marked Degraded.
    failure_threshold: u32,
    /// Monotonic time of the last check, used for scheduling.
    checked_at: Option<Instant>,
    /// Wall-clock time of the last check, used for reporting.
    checked_at_wall: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl LinkHealth {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            checked_at: None,
            checked_at_wall: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the last successful check is older than `interval`.
    pub fn check_due(&self, interval: Duration) -> bool {
        match self.checked_at {
            Some(at) => at.elapsed() >= interval,
            None => true,
        }
    }

    pub fn begin_connecting(&mut self) {
        debug!(from = %self.state, "link connecting");
        self.state = LinkState::Connecting;
    }

    /// A fresh connection counts as a passed health check.
    pub fn connected(&mut self) {
        info!("printer link connected");
        self.state = LinkState::Connected;
        self.mark_checked();
    }

    pub fn connect_failed(&mut self, error: &str) {
        warn!(error, "printer link connect failed");
        self.state = LinkState::Disconnected;
        self.last_error = Some(error.to_string());
    }

    /// An acquire gave up while a connect was in flight.
    pub fn abandon_connecting(&mut self) {
        if self.state == LinkState::Connecting {
            self.state = LinkState::Disconnected;
        }
    }

    pub fn record_probe(&mut self, probe: Probe) {
        self.mark_checked();
        if probe == Probe::Unhealthy {
            warn!("health check failed, link degraded");
            self.state = LinkState::Degraded;
            self.last_error = Some("health check failed".into());
        }
    }

    /// A job finished on this link without a reported failure.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(failures = self.consecutive_failures, "failure streak ended");
        }
        self.consecutive_failures = 0;
    }

    /// Record a write failure. Returns `true` when this failure degraded the
    /// link.
    pub fn record_failure(&mut self, error: &str) -> bool {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());

        if self.consecutive_failures >= self.failure_threshold && self.state == LinkState::Connected
        {
            warn!(
                failures = self.consecutive_failures,
                error, "printer link degraded"
            );
            self.state = LinkState::Degraded;
            true
        } else {
            debug!(failures = self.consecutive_failures, error, "write failure recorded");
            false
        }
    }

    pub fn disconnected(&mut self) {
        self.state = LinkState::Disconnected;
    }

    pub fn snapshot(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            last_health_check_at: self.checked_at_wall,
            consecutive_failure_count: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }

    fn mark_checked(&mut self) {
        self.checked_at = Some(Instant::now());
        self.checked_at_wall = Some(Utc::now());
    }
}
