// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory printer driver for desktop/CI builds where no printer is attached.
//
// Records every write and lets the caller script failures (refused opens,
// broken writes, unhealthy probes, slow writes) so the dispatch engine can be
// exercised without hardware.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use puente_core::error::{PuenteError, Result};

use crate::traits::{Probe, PrinterDriver};

/// Handle for one simulated connection.
#[derive(Debug)]
pub struct MemoryHandle {
    session: u32,
}

/// One write accepted by the simulated printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Which `open` produced the connection (1-based).
    pub session: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    offline: bool,
    failing_opens: u32,
    failing_writes: u32,
    unhealthy_probes: u32,
    write_delay: Duration,
    opens: u32,
    closes: u32,
    probes: u32,
    writes: Vec<WriteRecord>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Scriptable driver that prints into memory.
///
/// Cloning shares the simulated printer, so a test can keep one clone for
/// inspection while the engine owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the recorded writes.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse every `open` until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().failing_opens = count;
    }

    /// Make the next `count` calls to `write` fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.state().failing_writes = count;
    }

    /// Make the next `count` probes report Unhealthy.
    pub fn fail_next_probes(&self, count: u32) {
        self.state().unhealthy_probes = count;
    }

    /// Sleep inside every write, holding the simulated device busy.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    pub fn opens(&self) -> u32 {
        self.state().opens
    }

    pub fn closes(&self) -> u32 {
        self.state().closes
    }

    pub fn probes(&self) -> u32 {
        self.state().probes
    }

    /// Every accepted write, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// All accepted bytes concatenated.
    pub fn printed(&self) -> Vec<u8> {
        self.state()
            .writes
            .iter()
            .flat_map(|w| w.bytes.iter().copied())
            .collect()
    }

    /// Highest number of writes that were ever in progress at once.
    pub fn max_concurrent_writes(&self) -> usize {
        self.state().max_in_flight
    }
}

impl PrinterDriver for MemoryDriver {
    type Handle = MemoryHandle;

    fn endpoint(&self) -> String {
        "memory://printer".into()
    }

    async fn open(&self) -> Result<MemoryHandle> {
        let mut state = self.state();
        state.opens += 1;
        if state.offline {
            return Err(PuenteError::Driver("printer is offline".into()));
        }
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(PuenteError::Driver("connection refused".into()));
        }
        Ok(MemoryHandle {
            session: state.opens,
        })
    }

    async fn write(&self, handle: &mut MemoryHandle, bytes: &[u8]) -> Result<()> {
        let delay = {
            let mut state = self.state();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.write_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.in_flight -= 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(PuenteError::WriteFailure("broken pipe".into()));
        }
        state.writes.push(WriteRecord {
            session: handle.session,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    async fn close(&self, _handle: MemoryHandle) {
        self.state().closes += 1;
    }

    async fn probe(&self, _handle: &mut MemoryHandle) -> Probe {
        let mut state = self.state();
        state.probes += 1;
        if state.unhealthy_probes > 0 {
            state.unhealthy_probes -= 1;
            Probe::Unhealthy
        } else {
            Probe::Healthy
        }
    }
}
