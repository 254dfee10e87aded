// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::{Path, PathBuf};

/// Name of the settings file inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Return the application data directory, creating it if needed.
///
/// `PUENTE_DATA_DIR` wins when set; otherwise the XDG data home is used.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var_os("PUENTE_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs_fallback().join("puente"),
    };
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Path of the settings file in `dir`.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

fn dirs_fallback() -> PathBuf {
    // Try XDG data dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort
    PathBuf::from("/tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lives_in_data_dir() {
        let dir = Path::new("/var/lib/puente");
        assert_eq!(config_path(dir), PathBuf::from("/var/lib/puente/config.json"));
    }
}
