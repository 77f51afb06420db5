// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Opens the capture session persisted in the data directory.
//
// The SQLite store lives next to the config file. If it cannot be opened the
// session still runs on an in-memory store, it just won't survive the process.

use std::path::Path;

use pagestack_core::PipelineConfig;
use pagestack_core::error::Result;
use pagestack_document::TransformExecutor;
use pagestack_session::{
    MemoryStateStore, PageCollectionManager, SqliteStateStore, StateStore, Worker,
};
use tracing::{error, info};

const SESSION_DB: &str = "session.db";

/// Restore the session stored under `data_dir`.
///
/// Must be called from inside a tokio runtime.
pub fn open(data_dir: &Path) -> Result<PageCollectionManager> {
    info!(path = %data_dir.display(), "opening capture session");

    let config = PipelineConfig::load(data_dir);
    let executor = TransformExecutor::from_config(&config, data_dir)?;
    let worker = Worker::try_current()?;

    let store: Box<dyn StateStore> = match SqliteStateStore::open(data_dir.join(SESSION_DB)) {
        Ok(store) => Box::new(store),
        Err(e) => {
            error!(error = %e, "session database unavailable, using in-memory fallback");
            Box::new(MemoryStateStore::new())
        }
    };

    Ok(PageCollectionManager::restore(&config, executor, store, worker))
}

#[cfg(test)]
mod tests {
    use pagestack_core::types::{ImageRef, SourceKind};

    use super::*;

    #[tokio::test]
    async fn session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let added = {
            let mut session = open(dir.path()).unwrap();
            session
                .add(vec![ImageRef::new("/scans/a.jpg")], SourceKind::Gallery)
                .unwrap()
        };

        let session = open(dir.path()).unwrap();
        assert_eq!(session.pages(), &added[..]);
        assert!(dir.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn config_controls_capacity() {
        let dir = tempfile::tempdir().unwrap();
        PipelineConfig {
            max_pages: 2,
            ..Default::default()
        }
        .save(dir.path())
        .unwrap();

        let session = open(dir.path()).unwrap();
        assert_eq!(session.max_pages(), 2);
    }
}
