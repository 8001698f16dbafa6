// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! CostTracker: reserve/commit/refund budget accounting shared across a
//! pipeline run and every sub-pipeline it recurses into (§4.5).
//!
//! A stage reserves its estimated cost before the model call it is about
//! to make, commits the actual cost once the call returns, or refunds the
//! reservation if the stage never runs (e.g. it was skipped because an
//! upstream dependency failed). `CostTracker` is `Clone` and every clone
//! shares the same underlying ledger, so a sub-pipeline's tracker draws
//! from and reports into its parent's budget rather than a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::errors::SkillGraphError;

struct Ledger {
    limit: f64,
    spent: f64,
    reserved: HashMap<Uuid, f64>,
}

impl Ledger {
    fn reserved_total(&self) -> f64 {
        self.reserved.values().sum()
    }
}

/// Thread-safe, cloneable budget ledger.
#[derive(Clone)]
pub struct CostTracker {
    inner: Arc<Mutex<Ledger>>,
}

impl CostTracker {
    pub fn new(limit_usd: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ledger {
                limit: limit_usd,
                spent: 0.0,
                reserved: HashMap::new(),
            })),
        }
    }

    /// Fail if `estimate` would push spent+reserved+estimate over the limit,
    /// without recording anything (§4.5 `checkBudget`). This is the
    /// in-pipeline check and its failure is fatal — it aborts remaining
    /// levels, unlike [`Self::check_session_budget`]'s caller-side check.
    pub fn check_budget(&self, estimate: f64) -> Result<(), SkillGraphError> {
        let ledger = self.inner.lock().expect("cost tracker mutex poisoned");
        let committed = ledger.spent + ledger.reserved_total();
        if committed + estimate > ledger.limit {
            return Err(SkillGraphError::BudgetExceededError {
                spent_plus_committed: committed + estimate,
                limit: ledger.limit,
            });
        }
        Ok(())
    }

    /// Caller-side pre-flight check comparing an estimated whole-pipeline
    /// cost against the session's remaining budget, separate from and
    /// outside of any one pipeline's own `CostTracker` (§4.5 "Outside the
    /// engine, a separate session budget is enforced by the caller").
    pub fn check_session_budget(
        estimate: f64,
        session_spent_usd: f64,
        session_budget_usd: f64,
    ) -> Result<(), SkillGraphError> {
        if session_spent_usd + estimate > session_budget_usd {
            return Err(SkillGraphError::SessionBudgetExceeded {
                estimate,
                spent: session_spent_usd,
                budget: session_budget_usd,
            });
        }
        Ok(())
    }

    /// Reserve `estimate` against the budget, returning a reservation id
    /// the caller must later [`Self::commit`] or [`Self::refund`].
    pub fn reserve(&self, estimate: f64) -> Result<Uuid, SkillGraphError> {
        self.check_budget(estimate)?;
        let mut ledger = self.inner.lock().expect("cost tracker mutex poisoned");
        let id = Uuid::new_v4();
        ledger.reserved.insert(id, estimate);
        Ok(id)
    }

    /// Convert a reservation into spend at its actual cost, which may
    /// differ from the estimate. Fails (without rolling back the spend) if
    /// the actual total now exceeds the hard limit — the caller is
    /// expected to treat this as fatal and stop dispatching new stages.
    pub fn commit(&self, reservation: Uuid, actual_cost: f64) -> Result<(), SkillGraphError> {
        let mut ledger = self.inner.lock().expect("cost tracker mutex poisoned");
        ledger.reserved.remove(&reservation);
        ledger.spent += actual_cost;
        if ledger.spent + ledger.reserved_total() > ledger.limit {
            return Err(SkillGraphError::BudgetExceededError {
                spent_plus_committed: ledger.spent + ledger.reserved_total(),
                limit: ledger.limit,
            });
        }
        Ok(())
    }

    /// Release a reservation without recording any spend, for a stage that
    /// never ran.
    pub fn refund(&self, reservation: Uuid) {
        let mut ledger = self.inner.lock().expect("cost tracker mutex poisoned");
        ledger.reserved.remove(&reservation);
    }

    pub fn spent(&self) -> f64 {
        self.inner.lock().expect("cost tracker mutex poisoned").spent
    }

    pub fn remaining(&self) -> f64 {
        let ledger = self.inner.lock().expect("cost tracker mutex poisoned");
        (ledger.limit - ledger.spent - ledger.reserved_total()).max(0.0)
    }
}
