// SPDX-License-Identifier: MIT

//! Coalescing 1-slot wake-up channel for stage workers (§5: "each stage's
//! signal channel has capacity 1; a `signal()` operation is non-blocking").

use std::sync::Arc;
use tokio::sync::Notify;

/// Cheap to clone; every clone pulses/waits on the same underlying `Notify`.
#[derive(Clone, Default)]
pub struct StageSignal {
    notify: Arc<Notify>,
}

impl StageSignal {
    pub fn new() -> Self {
        Self { notify: Arc::new(Notify::new()) }
    }

    /// Wake the worker if it is waiting; otherwise leave a single pending
    /// permit so the next `wait()` returns immediately. Never blocks.
    pub fn pulse(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
