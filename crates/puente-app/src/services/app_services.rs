// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — builds the dispatch engine for the configured
// printer and runs the HTTP listener in front of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use puente_bridge::{PrinterDriver, TcpDriver};
use puente_core::BridgeConfig;
use puente_core::error::Result;
use puente_print::{Api, ConnectionManager, Dispatcher, Encoder, HttpServer};
use tracing::{info, warn};

use super::data_dir;

/// Everything the daemon runs, for one printer.
pub struct AppServices<D: PrinterDriver> {
    dispatcher: Arc<Dispatcher<D>>,
    server: HttpServer,
    config: BridgeConfig,
}

/// Read the settings file in `dir`, writing the defaults out on first run so
/// they can be edited.
pub fn load_config(dir: &Path) -> Result<BridgeConfig> {
    let path = data_dir::config_path(dir);
    let exists = path.exists();
    let config = BridgeConfig::load_or_default(&path)?;
    if !exists {
        if let Err(e) = config.save(&path) {
            warn!(path = %path.display(), error = %e, "could not write default config");
        } else {
            info!(path = %path.display(), "wrote default config");
        }
    }
    Ok(config)
}

impl AppServices<TcpDriver> {
    /// Services for a raw TCP printer at `config.link.address`.
    pub fn for_tcp_printer(config: BridgeConfig) -> Self {
        let driver = TcpDriver::new(&config.link.address);
        Self::new(driver, config)
    }
}

impl<D: PrinterDriver> AppServices<D> {
    pub fn new(driver: D, config: BridgeConfig) -> Self {
        let link = Arc::new(ConnectionManager::new(driver, config.link.clone()));
        let encoder = Encoder::with_native_qr(config.encoder.clone());
        let dispatcher = Arc::new(Dispatcher::new(&config, link, encoder));
        let server = HttpServer::new(config.server.port).with_advertise(config.server.advertise);
        Self {
            dispatcher,
            server,
            config,
        }
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Start the dispatch worker, then open the listener.
    pub async fn start(&mut self) -> Result<()> {
        self.dispatcher.start();
        self.server.start(Api::new(self.dispatcher.clone())).await?;
        info!(
            printer = self.dispatcher.link().endpoint(),
            port = self.config.server.port,
            "bridge ready"
        );
        Ok(())
    }

    /// Close the listener first so no job arrives after the queue is drained.
    pub async fn stop(&mut self) -> Result<()> {
        self.server.stop().await?;
        self.dispatcher.shutdown().await;
        info!("bridge stopped");
        Ok(())
    }
}

/// Default data directory for the daemon.
pub fn default_data_dir() -> PathBuf {
    data_dir::data_dir()
}
