// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::PathBuf;

use tracing::warn;

/// Environment variable that overrides the data directory outright.
pub const DATA_DIR_ENV: &str = "PAGESTACK_DATA_DIR";

/// Return the application data directory, creating it if needed.
///
/// `$PAGESTACK_DATA_DIR` wins; otherwise `pagestack/` under
/// `$XDG_DATA_HOME`, `~/.local/share`, or the temp dir, in that order. On
/// mobile the host app should point `PAGESTACK_DATA_DIR` at its private
/// files directory.
pub fn data_dir() -> PathBuf {
    let dir = env_path(DATA_DIR_ENV).unwrap_or_else(|| {
        env_path("XDG_DATA_HOME")
            .or_else(|| env_path("HOME").map(|home| home.join(".local").join("share")))
            .unwrap_or_else(std::env::temp_dir)
            .join("pagestack")
    });
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "could not create data directory");
    }
    dir
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
