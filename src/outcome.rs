//! Per-step results shared by the runner and the mock peer.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Verdict for one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Mismatch { expected: Bytes },
    Failed(String),
}

/// Record of one executed step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub index: usize,
    pub kind: &'static str,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Bytes sent or received by the step, if any.
    pub bytes: Option<Bytes>,
    pub verdict: Verdict,
}

impl StepOutcome {
    /// Test case name used in reports, e.g. `03 recv login_ack`.
    pub fn case_name(&self) -> String {
        format!("{:02} {}", self.index, self.label)
    }
}

/// Result of a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes matched the expectation (or no expectation was set).
    Matched(Bytes),
    /// Bytes differ from the expectation.
    Mismatch(Bytes),
}

impl Received {
    pub fn bytes(&self) -> &Bytes {
        match self {
            Received::Matched(b) | Received::Mismatch(b) => b,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Received::Matched(_))
    }
}
