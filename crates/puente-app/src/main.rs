// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Puente — LAN print bridge for ESC/POS receipt printers
//
// Entry point. Initialises logging, loads the config, starts the dispatch
// engine and HTTP listener, and runs until Ctrl-C.
//
// Usage: puente [PRINTER_ADDRESS]
//
// The optional argument overrides `link.address` from the config file.

mod services;

use std::process::ExitCode;

use services::app_services::{self, AppServices};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Puente starting");

    let dir = app_services::default_data_dir();
    let mut config = match app_services::load_config(&dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %dir.display(), error = %e, "invalid config file");
            return ExitCode::FAILURE;
        }
    };
    if let Some(address) = std::env::args().nth(1) {
        config.link.address = address;
    }

    let mut services = AppServices::for_tcp_printer(config);
    if let Err(e) = services.start().await {
        tracing::error!(error = %e, "failed to start bridge");
        return ExitCode::FAILURE;
    }
    if let Some(addr) = services.server().local_addr() {
        tracing::info!(%addr, "submit jobs with POST /jobs");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C, shutting down");
    }

    match services.stop().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "unclean shutdown");
            ExitCode::FAILURE
        }
    }
}
