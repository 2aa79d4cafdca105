/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Execution context of one pipeline run: the batch sequence number
/// used for log correlation, its deadline and a cancellation token
/// fired when the deadline passes.
#[derive(Clone, Debug)]
pub struct ExecContext {
    seq: u64,
    deadline: Instant,
    token: CancellationToken,
}

impl ExecContext {
    pub fn new(seq: u64, timeout: Duration) -> Self {
        Self {
            seq,
            deadline: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Deadline for a sub-operation: `timeout` from now, but never
    /// beyond the context's own deadline.
    pub fn child_deadline(&self, timeout: Duration) -> Instant {
        (Instant::now() + timeout).min(self.deadline)
    }
}
