// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Exponential backoff with random jitter for reconnect attempts.

use std::time::Duration;

use rand::Rng;

use puente_core::config::BackoffConfig;

/// Delay before reconnect attempt number `attempt` (0-based).
///
/// `base * 2^attempt`, plus up to one `base` of random jitter, capped at
/// `max_delay`.
pub fn compute_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));

    let jitter_ms = if config.jitter && base_ms > 0 {
        rand::rng().random_range(0..base_ms)
    } else {
        0
    };

    let total_ms = exp_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}
