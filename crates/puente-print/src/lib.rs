// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Puente Print — the dispatch engine. ESC/POS command encoding (text, QR
// codes and raster images), the printer link with reconnect and health
// checks, the single-worker job queue, the status registry, the receipt
// templates and the HTTP submission API that feeds them.

pub mod api;
pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod encoder;
pub mod health;
pub mod invoice;
pub mod order;
pub mod raster;
pub mod registry;
pub mod server;

pub use api::{Api, ApiResponse};
pub use connection::{ConnectionManager, LinkLease};
pub use dispatcher::Dispatcher;
pub use encoder::{CommandFrame, Encoder};
pub use invoice::Invoice;
pub use order::Order;
pub use raster::Raster;
pub use registry::StatusRegistry;
pub use server::HttpServer;
