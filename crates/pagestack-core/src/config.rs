// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

const CONFIG_FILE: &str = "config.json";

/// Persistent pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of pages in one capture session.
    pub max_pages: usize,
    /// Smallest crop width/height, in viewport pixels.
    pub min_crop_size: f32,
    /// Tolerance around a crop handle for pointer hit-testing.
    pub touch_radius: f32,
    /// JPEG quality (1-100) for re-encoded transform outputs.
    pub jpeg_quality: u8,
    /// Image cache location. `None` means `<data dir>/cache`.
    pub cache_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: crate::MAX_PAGES,
            min_crop_size: 48.0,
            touch_radius: 40.0,
            jpeg_quality: 90,
            cache_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Load `config.json` from `data_dir`, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);
        let Ok(data) = std::fs::read_to_string(&path) else {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Write this config as pretty JSON into `data_dir`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Resolved cache directory.
    pub fn resolved_cache_dir(&self, data_dir: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(PipelineConfig::load(dir.path()), PipelineConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            max_pages: 5,
            jpeg_quality: 70,
            ..Default::default()
        };
        config.save(dir.path()).expect("save");
        assert_eq!(PipelineConfig::load(dir.path()), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"touch_radius": 24.0}"#).unwrap();
        let config = PipelineConfig::load(dir.path());
        assert_eq!(config.touch_radius, 24.0);
        assert_eq!(config.max_pages, 20);
    }

    #[test]
    fn cache_dir_defaults_under_data_dir() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.resolved_cache_dir(Path::new("/srv/pagestack")),
            PathBuf::from("/srv/pagestack/cache")
        );
    }
}
