// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Puente print bridge.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PuenteError, Result};

/// Unique, monotonically increasing identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Horizontal alignment of a text line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Character emphasis for a text line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    #[default]
    Normal,
    Bold,
    Underline,
    /// Double width and double height.
    DoubleSize,
    BoldDoubleSize,
}

/// Cash drawer connector pin driven by the drawer kick pulse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawerPin {
    #[default]
    Pin2,
    Pin5,
}

/// One logical piece of a job's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    /// A single printed line.
    Text {
        content: String,
        #[serde(default)]
        align: Alignment,
        #[serde(default)]
        emphasis: Emphasis,
    },
    /// A QR code printed by the device.
    Qr {
        payload: String,
        #[serde(default = "default_module_size")]
        module_size: u8,
    },
    /// Feed and cut the paper.
    Cut,
    /// Advance the paper by `lines` lines.
    Feed { lines: u8 },
    /// Kick the cash drawer connected to the printer.
    OpenDrawer {
        #[serde(default)]
        pin: DrawerPin,
    },
    /// A picture printed as a raster bit image.
    ///
    /// `data` is base64 (PNG, JPEG, BMP, ...), optionally as a
    /// `data:image/...;base64,` URI.
    Image { data: String },
}

fn default_module_size() -> u8 {
    4
}

impl Segment {
    /// Convenience constructor for a left-aligned, unemphasised line.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            align: Alignment::Left,
            emphasis: Emphasis::Normal,
        }
    }

    /// Convenience constructor for a styled line.
    pub fn styled(content: impl Into<String>, align: Alignment, emphasis: Emphasis) -> Self {
        Self::Text {
            content: content.into(),
            align,
            emphasis,
        }
    }

    pub fn qr(payload: impl Into<String>, module_size: u8) -> Self {
        Self::Qr {
            payload: payload.into(),
            module_size,
        }
    }

    pub fn image(data: impl Into<String>) -> Self {
        Self::Image { data: data.into() }
    }
}

/// Immutable description of one unit of print work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescription {
    segments: Vec<Segment>,
}

impl JobDescription {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The ordered segments of this job.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the paper is cut after the last printed content. Drawer kicks
    /// after the cut print nothing, so they do not count.
    pub fn ends_with_cut(&self) -> bool {
        matches!(
            self.segments
                .iter()
                .rev()
                .find(|s| !matches!(s, Segment::OpenDrawer { .. })),
            Some(Segment::Cut)
        )
    }

    /// Check the description before it is accepted into the queue.
    ///
    /// Rejects empty jobs, empty or oversized QR payloads, and text carrying
    /// control characters (which would be interpreted as printer commands).
    pub fn validate(&self, max_qr_payload: usize) -> Result<()> {
        if self.segments.is_empty() {
            return Err(PuenteError::Validation("job has no segments".into()));
        }

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Text { content, .. } => {
                    if let Some(ch) = content.chars().find(|c| c.is_control()) {
                        return Err(PuenteError::Validation(format!(
                            "segment {index}: text contains control character {ch:?}"
                        )));
                    }
                }
                Segment::Qr { payload, .. } => {
                    if payload.is_empty() {
                        return Err(PuenteError::Validation(format!(
                            "segment {index}: QR payload is empty"
                        )));
                    }
                    if payload.len() > max_qr_payload {
                        return Err(PuenteError::Validation(format!(
                            "segment {index}: QR payload of {} bytes exceeds the {max_qr_payload}-byte limit",
                            payload.len()
                        )));
                    }
                }
                Segment::Image { data } => {
                    if data.trim().is_empty() {
                        return Err(PuenteError::Validation(format!(
                            "segment {index}: image data is empty"
                        )));
                    }
                }
                Segment::Cut | Segment::Feed { .. } | Segment::OpenDrawer { .. } => {}
            }
        }

        Ok(())
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Queued, waiting for the dispatcher.
    Pending,
    /// Frames are being written to the printer.
    Executing,
    /// Every frame was written.
    Completed,
    /// Failed; the reason is in `failure_reason`.
    Failed,
    /// Removed from the queue before it was dispatched.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Executing, Self::Completed)
                | (Self::Executing, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A print job as tracked by the dispatcher and the status registry.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub description: Arc<JobDescription>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn new(id: JobId, description: impl Into<Arc<JobDescription>>) -> Self {
        Self {
            id,
            description: description.into(),
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }
}

/// Character set used for text sent to the printer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    /// Latin receipts (WPC1252 code page).
    #[default]
    Windows1252,
    /// Simplified Chinese (GB 18030 two-byte subset).
    Gbk,
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows1252 => f.write_str("windows-1252"),
            Self::Gbk => f.write_str("GBK"),
        }
    }
}

/// Connection states of the printer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// A write or health check failed; reconnect before the next job.
    Degraded,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Degraded => "Degraded",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the printer link for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub consecutive_failure_count: u32,
    pub last_error: Option<String>,
}
