// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the printer hardware link and the
// QR encoder.
//
// The dispatch engine only ever sees these traits. Each transport (raw TCP,
// in-memory) lives in its own module.

use std::future::Future;

use puente_core::error::{EncodingError, Result};

/// Outcome of a health probe on an open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Healthy,
    Unhealthy,
}

/// Device driver for the physical printer link.
///
/// Every call is an explicit request/response: drivers never report state
/// changes in the background. A failed `write` leaves the handle in an
/// unknown state, so callers close it before writing again.
pub trait PrinterDriver: Send + Sync + 'static {
    /// Open connection to the device.
    type Handle: Send + 'static;

    /// Short human-readable name of the device endpoint, for logs.
    fn endpoint(&self) -> String;

    /// Open a new connection to the printer.
    fn open(&self) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Write all of `bytes` to the printer.
    fn write(
        &self,
        handle: &mut Self::Handle,
        bytes: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Close the connection. Errors are logged by the driver, never returned.
    fn close(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;

    /// Check whether an open connection can still accept data.
    fn probe(&self, handle: &mut Self::Handle) -> impl Future<Output = Probe> + Send;
}

/// Produces the device command bytes that print a QR code.
///
/// Implementations must be deterministic: the same payload and module size
/// always yield the same bytes.
pub trait QrRenderer: Send + Sync {
    fn render_qr(&self, payload: &str, module_size: u8) -> std::result::Result<Vec<u8>, EncodingError>;
}
