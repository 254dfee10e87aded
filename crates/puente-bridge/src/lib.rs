// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Puente Bridge — collaborators at the edge of the dispatch engine: the
// printer device driver and the QR encoder.
//
// The engine is generic over `PrinterDriver`, so each transport is a plain
// struct with no dynamic dispatch on the write path.

pub mod memory;
pub mod qr;
pub mod tcp;
pub mod traits;

pub use memory::MemoryDriver;
pub use qr::{EscPosQrRenderer, QrErrorCorrection};
pub use tcp::TcpDriver;
pub use traits::{Probe, PrinterDriver, QrRenderer};
