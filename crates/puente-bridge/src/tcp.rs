// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP printer driver (JetDirect, port 9100).
//
// Most Ethernet and Wi-Fi receipt printers accept ESC/POS bytes on a plain
// TCP socket. There is no framing and no acknowledgement: a write succeeds
// once the kernel has accepted the bytes.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use puente_core::error::{PuenteError, Result};

use crate::traits::{Probe, PrinterDriver};

/// Default raw TCP port (HP JetDirect).
pub const RAW_PORT: u16 = 9100;

/// Bytes per write call, so a stalled printer is detected within one chunk.
const CHUNK_SIZE: usize = 4096;

/// DLE EOT 1: transmit printer status in real time.
const STATUS_QUERY: [u8; 3] = [0x10, 0x04, 0x01];

/// Offline bit of the DLE EOT 1 status byte.
const STATUS_OFFLINE: u8 = 0x08;

/// Driver for printers reachable over raw TCP.
#[derive(Debug, Clone)]
pub struct TcpDriver {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    /// Query the printer with DLE EOT instead of only checking the socket.
    status_query: bool,
}

impl TcpDriver {
    /// Create a driver for `host:port`. A missing port defaults to 9100.
    pub fn new(addr: &str) -> Self {
        let addr = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{addr}:{RAW_PORT}")
        };
        Self {
            addr,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(15),
            status_query: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Enable the real-time status query during health probes. Only turn this
    /// on for printers that answer DLE EOT over the network.
    pub fn with_status_query(mut self, enabled: bool) -> Self {
        self.status_query = enabled;
        self
    }

    async fn query_status(&self, stream: &mut TcpStream) -> Probe {
        if let Err(e) = stream.write_all(&STATUS_QUERY).await {
            warn!(addr = %self.addr, error = %e, "status query write failed");
            return Probe::Unhealthy;
        }

        let mut status = [0u8; 1];
        match tokio::time::timeout(self.connect_timeout, stream.read_exact(&mut status)).await {
            Ok(Ok(_)) if status[0] & STATUS_OFFLINE == 0 => Probe::Healthy,
            Ok(Ok(_)) => {
                warn!(addr = %self.addr, status = status[0], "printer reports offline");
                Probe::Unhealthy
            }
            Ok(Err(e)) => {
                warn!(addr = %self.addr, error = %e, "status read failed");
                Probe::Unhealthy
            }
            Err(_) => {
                warn!(addr = %self.addr, "status query timed out");
                Probe::Unhealthy
            }
        }
    }
}

impl PrinterDriver for TcpDriver {
    type Handle = TcpStream;

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn open(&self) -> Result<TcpStream> {
        info!(addr = %self.addr, "connecting via raw TCP");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                PuenteError::Driver(format!(
                    "raw TCP connection to {} timed out after {}ms",
                    self.addr,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| PuenteError::Driver(format!("raw TCP connect to {}: {e}", self.addr)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| PuenteError::Driver(format!("set TCP_NODELAY: {e}")))?;

        Ok(stream)
    }

    async fn write(&self, stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
        let mut sent = 0;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            tokio::time::timeout(self.write_timeout, stream.write_all(chunk))
                .await
                .map_err(|_| {
                    PuenteError::WriteFailure(format!("raw TCP send stalled at byte {sent}"))
                })?
                .map_err(|e| {
                    PuenteError::WriteFailure(format!("raw TCP send failed at byte {sent}: {e}"))
                })?;
            sent += chunk.len();
        }

        tokio::time::timeout(self.write_timeout, stream.flush())
            .await
            .map_err(|_| PuenteError::WriteFailure("raw TCP flush stalled".into()))?
            .map_err(|e| PuenteError::WriteFailure(format!("raw TCP flush: {e}")))?;

        debug!(sent, "raw TCP frame sent");
        Ok(())
    }

    async fn close(&self, mut stream: TcpStream) {
        if let Err(e) = stream.shutdown().await {
            debug!(addr = %self.addr, error = %e, "raw TCP shutdown");
        }
    }

    async fn probe(&self, stream: &mut TcpStream) -> Probe {
        if self.status_query {
            return self.query_status(stream).await;
        }

        // A readable socket with zero bytes means the printer hung up.
        let mut buf = [0u8; 64];
        match stream.try_read(&mut buf) {
            Ok(0) => Probe::Unhealthy,
            Ok(_) => Probe::Healthy,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Probe::Healthy,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "raw TCP probe failed");
                Probe::Unhealthy
            }
        }
    }
}
