// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — wires configuration, the printer driver, the dispatch engine
// and the HTTP listener together for the daemon.

pub mod app_services;
pub mod data_dir;
