// SPDX-License-Identifier: AGPL-3.0
//! Request/result shapes for best-effort and transactional batch
//! invocation.

use serde::{Deserialize, Serialize};

use crate::domain::resource::{InvocationRequest, InvocationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    /// Evaluate policy per item; each allowed item runs independently, and
    /// one failure does not affect the others.
    BestEffort,
    /// All operations share one storage transaction; any failure rolls
    /// back the whole batch.
    Transactional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInvocationRequest {
    pub mode: BulkMode,
    pub items: Vec<InvocationRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInvocationResult {
    pub mode: BulkMode,
    pub results: Vec<InvocationResult>,
    /// true only for `Transactional` batches where every item succeeded.
    pub committed: bool,
}

impl BulkInvocationResult {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}
