// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.
//
// Durations are stored as integer milliseconds so the JSON file stays easy to
// edit by hand on the device.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PuenteError, Result};
use crate::types::Charset;

/// Persistent bridge settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub queue: QueueConfig,
    pub link: LinkConfig,
    pub retention: RetentionConfig,
    pub encoder: EncoderConfig,
    pub server: ServerConfig,
}

impl BridgeConfig {
    /// Read the configuration file, falling back to defaults when it does not
    /// exist. A file that exists but does not parse or validate is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PuenteError::Config(msg.into()));
        if self.queue.capacity == 0 {
            return invalid("queue.capacity must be at least 1");
        }
        if self.queue.pending_timeout.is_zero() {
            return invalid("queue.pending_timeout must be greater than zero");
        }
        if self.link.acquire_timeout.is_zero() {
            return invalid("link.acquire_timeout must be greater than zero");
        }
        if self.encoder.paper_width == 0 {
            return invalid("encoder.paper_width must be at least 1");
        }
        if !(8..=MAX_IMAGE_WIDTH).contains(&self.encoder.image_width) {
            return invalid("encoder.image_width must be between 8 and 2040 dots");
        }
        Ok(())
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Job queue limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending jobs before `submit` answers QueueFull.
    pub capacity: usize,
    /// Pending jobs older than this are cancelled without being printed.
    #[serde(with = "duration_ms")]
    pub pending_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            pending_timeout: Duration::from_secs(120),
        }
    }
}

/// Printer link management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Printer address for the raw TCP driver (`host:port`).
    pub address: String,
    /// How long the dispatcher waits for a healthy link before failing a job.
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Duration,
    /// A connected link is probed before use when its last check is older.
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    /// Consecutive write failures before the link is marked Degraded.
    pub failure_threshold: u32,
    pub backoff: BackoffConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9100".into(),
            acquire_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            failure_threshold: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Add a random delay in `[0, base_delay)` to every wait.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// How long finished jobs stay queryable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Maximum finished jobs kept; the oldest are evicted first.
    pub cap: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            cap: 256,
        }
    }
}

/// Widest raster accepted, in dots (255 bytes per row).
pub const MAX_IMAGE_WIDTH: u32 = 2040;

/// Printer capabilities used by the command encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub charset: Charset,
    /// Largest QR payload in bytes (QR version 40, error correction L).
    pub max_qr_payload: usize,
    /// Characters per line (32 on 58 mm paper, 48 on 80 mm).
    pub paper_width: usize,
    /// Printable width in dots; wider images are scaled down to fit.
    pub image_width: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            charset: Charset::Windows1252,
            max_qr_payload: 2953,
            paper_width: 48,
            image_width: 384,
        }
    }
}

/// Submission endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Advertise the endpoint on the LAN via mDNS.
    pub advertise: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            advertise: true,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
