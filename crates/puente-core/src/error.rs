// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Puente.

use thiserror::Error;

use crate::types::{Charset, JobId, JobStatus};

/// Top-level error type for all Puente operations.
#[derive(Debug, Error)]
pub enum PuenteError {
    // -- Submission errors --
    #[error("invalid job description: {0}")]
    Validation(String),

    #[error("queue full: {capacity} jobs already pending")]
    QueueFull { capacity: usize },

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} cannot be cancelled, it is already {status}")]
    NotCancellable { id: JobId, status: JobStatus },

    // -- Printer link errors --
    #[error("printer link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("write to printer failed: {0}")]
    WriteFailure(String),

    #[error("printer driver error: {0}")]
    Driver(String),

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    // -- Service lifecycle --
    #[error("print server error: {0}")]
    Server(String),

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Job content that the printer cannot reproduce.
///
/// Raised by the command encoder. The content itself is the problem, so jobs
/// failing with this error are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("QR payload of {len} bytes exceeds the {max}-byte limit")]
    QrTooLarge { len: usize, max: usize },

    #[error("character {ch:?} cannot be printed in {charset}")]
    UnsupportedCharacter { ch: char, charset: Charset },

    #[error("image cannot be printed: {0}")]
    Image(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PuenteError>;
