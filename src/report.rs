//! JUnit XML reports.
//!
//! Each run (or mock peer conversation) becomes one test suite; each step
//! becomes a test case. Mismatches are failures, I/O problems are errors.

use crate::message::Escaped;
use crate::outcome::{StepOutcome, Verdict};
use junit_report::{
    Duration as JUnitDuration, ReportBuilder, TestCaseBuilder, TestSuite, TestSuiteBuilder,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Report writing errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to create report '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write report '{}': {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

/// Accumulates step results into a JUnit test suite.
#[derive(Debug)]
pub struct Reporter {
    suite: TestSuite,
    cases: usize,
}

impl Reporter {
    pub fn new(suite: &str) -> Self {
        Self {
            suite: TestSuiteBuilder::new(suite).build(),
            cases: 0,
        }
    }

    /// Add one test case per outcome.
    pub fn record_all<'a>(&mut self, outcomes: impl IntoIterator<Item = &'a StepOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn record(&mut self, outcome: &StepOutcome) {
        let name = outcome.case_name();
        let time = to_junit(outcome.elapsed);

        let case = match &outcome.verdict {
            Verdict::Passed => TestCaseBuilder::success(&name, time).build(),
            Verdict::Mismatch { expected } => {
                let received = outcome.bytes.as_deref().unwrap_or_default();
                let message = format!(
                    "expected {}, received {}",
                    Escaped(expected),
                    Escaped(received)
                );
                TestCaseBuilder::failure(&name, time, "mismatch", &message).build()
            }
            Verdict::Failed(reason) => TestCaseBuilder::error(&name, time, "io", reason).build(),
        };

        self.suite.add_testcase(case);
        self.cases += 1;
    }

    pub fn len(&self) -> usize {
        self.cases
    }

    pub fn is_empty(&self) -> bool {
        self.cases == 0
    }

    /// Write the report as XML to `path`.
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let report = ReportBuilder::new()
            .add_testsuite(self.suite.clone())
            .build();

        let mut file = File::create(path).map_err(|source| ReportError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        report
            .write_xml(&mut file)
            .map_err(|e| ReportError::Write {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!(path = %path.display(), cases = self.len(), "Report written");
        Ok(())
    }
}

fn to_junit(duration: Duration) -> JUnitDuration {
    JUnitDuration::milliseconds(duration.as_millis() as i64)
}
