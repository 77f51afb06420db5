// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background work scheduler. Image copies and transforms block on file I/O
// and decoding, so they run on tokio's blocking pool and come back as futures.

use std::future::Future;

use pagestack_core::error::{PipelineError, Result};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle for running blocking closures off the interaction thread.
#[derive(Debug, Clone)]
pub struct Worker {
    handle: Handle,
}

impl Worker {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// A worker bound to the runtime this is called from.
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PipelineError::Worker(format!("no tokio runtime: {e}")))
    }

    /// Run `job` on the blocking pool.
    ///
    /// A panicking job resolves to `PipelineError::Worker` instead of
    /// unwinding into the caller.
    pub fn run<F, T>(&self, job: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.handle.spawn_blocking(job);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Worker(e.to_string())),
            }
        }
    }

    /// Spawn an async task on the worker's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}
