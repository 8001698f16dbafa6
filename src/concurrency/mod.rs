// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Bounded concurrency gate for dispatching stages within an execution
//! level (§4.6, §5, invariant on FIFO fairness).
//!
//! `tokio::sync::Semaphore` already queues waiters FIFO; this wrapper just
//! gives that guarantee a name scoped to the pipeline engine and keeps the
//! permit type out of callers' hands until they've actually acquired one.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::errors::SkillGraphError;

/// A bounded pool of execution slots, shared (via `Arc`) across every stage
/// dispatched within one pipeline run, including its sub-pipelines.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Wait for a slot. Waiters are served strictly in acquisition order.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, SkillGraphError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| SkillGraphError::AbortError)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
