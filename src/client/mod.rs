//! Exchange runner: plays a scenario against a remote peer.
//!
//! Single-threaded and blocking. One `Session` is opened per run and
//! released when the run returns, whichever way it ends:
//!
//! ```text
//! Disconnected -> Connected -> (Sending | Receiving)* -> Closed
//! ```
//!
//! A failed connect is returned as an error. Mismatches and I/O failures
//! after connecting end up in the `RunReport` so they can be reported.

mod session;

pub use session::Session;

pub use crate::outcome::{Received, StepOutcome, Verdict};

use crate::message::Escaped;
use crate::scenario::{Expect, Scenario, Step, Strictness};
use bytes::Bytes;
use chrono::Utc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Exchange errors.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(std::io::Error),
    #[error("step {step} ({label}): expected {expected}, received {received}")]
    Mismatch {
        step: usize,
        label: String,
        expected: String,
        received: String,
    },
    #[error("step {step} ({label}) failed: {reason}")]
    Aborted {
        step: usize,
        label: String,
        reason: String,
    },
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step executed.
    Completed,
    /// Strict mode stopped at a mismatched reply.
    Mismatched { step: usize },
    /// An I/O error stopped the run.
    Failed { step: usize },
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub scenario: String,
    pub outcomes: Vec<StepOutcome>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn sent(&self) -> usize {
        self.count(|o| o.kind == "send" && o.verdict == Verdict::Passed)
    }

    pub fn matched(&self) -> usize {
        self.count(|o| o.kind == "recv" && o.verdict == Verdict::Passed)
    }

    pub fn mismatches(&self) -> usize {
        self.count(|o| matches!(o.verdict, Verdict::Mismatch { .. }))
    }

    fn count(&self, f: impl Fn(&StepOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }

    /// Convert an aborted run into the error that stopped it.
    pub fn into_result(self) -> Result<RunReport, ExchangeError> {
        let step = match self.status {
            RunStatus::Completed => return Ok(self),
            RunStatus::Mismatched { step } | RunStatus::Failed { step } => step,
        };

        let failure = self.outcomes.iter().find(|o| o.index == step).and_then(|o| {
            let received = Escaped(o.bytes.as_deref().unwrap_or_default()).to_string();
            match &o.verdict {
                Verdict::Mismatch { expected } => Some(ExchangeError::Mismatch {
                    step,
                    label: o.label.clone(),
                    expected: Escaped(expected).to_string(),
                    received,
                }),
                Verdict::Failed(reason) => Some(ExchangeError::Aborted {
                    step,
                    label: o.label.clone(),
                    reason: reason.clone(),
                }),
                Verdict::Passed => None,
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Plays a scenario over one session.
#[derive(Debug, Clone)]
pub struct Runner {
    scenario: Scenario,
}

impl Runner {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }

    /// Connect, execute every step in order, and close.
    pub fn run(&self) -> Result<RunReport, ExchangeError> {
        let scenario = &self.scenario;
        info!(
            scenario = %scenario.name,
            endpoint = %scenario.endpoint,
            steps = scenario.steps.len(),
            strictness = ?scenario.strictness,
            "Starting exchange"
        );

        let mut session =
            Session::connect(&scenario.endpoint, scenario.keepalive, scenario.recv_buffer)?;
        info!("connected to server at {}", scenario.endpoint);

        let mut outcomes = Vec::with_capacity(scenario.steps.len());
        let mut status = RunStatus::Completed;

        for (index, step) in scenario.steps.iter().enumerate() {
            let started_at = Utc::now();
            let start = Instant::now();
            let result = execute(&mut session, step);
            let elapsed = start.elapsed();

            let (bytes, verdict) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    error!(step = index, error = %e, "Step failed");
                    (None, Verdict::Failed(e.to_string()))
                }
            };

            let stop = match &verdict {
                Verdict::Passed => None,
                Verdict::Mismatch { .. } if scenario.strictness == Strictness::Lenient => None,
                Verdict::Mismatch { .. } => Some(RunStatus::Mismatched { step: index }),
                Verdict::Failed(_) => Some(RunStatus::Failed { step: index }),
            };

            outcomes.push(StepOutcome {
                index,
                kind: step.kind(),
                label: step.to_string(),
                started_at,
                elapsed,
                bytes,
                verdict,
            });

            if let Some(stopped) = stop {
                warn!(step = index, "Stopping exchange early");
                status = stopped;
                break;
            }
        }

        drop(session);

        let report = RunReport {
            scenario: scenario.name.clone(),
            outcomes,
            status,
        };
        info!(
            sent = report.sent(),
            matched = report.matched(),
            mismatches = report.mismatches(),
            status = ?report.status,
            "Exchange finished"
        );
        Ok(report)
    }
}

fn execute(
    session: &mut Session,
    step: &Step,
) -> Result<(Option<Bytes>, Verdict), ExchangeError> {
    match step {
        Step::Send(msg) => {
            session.send(msg)?;
            Ok((Some(msg.payload().clone()), Verdict::Passed))
        }
        Step::Recv(Expect::Any) => {
            let received = session.recv_any()?;
            Ok((Some(received), Verdict::Passed))
        }
        Step::Recv(Expect::Exact(expected)) => match session.recv_exact(expected)? {
            Received::Matched(b) => Ok((Some(b), Verdict::Passed)),
            Received::Mismatch(b) => Ok((
                Some(b),
                Verdict::Mismatch {
                    expected: expected.payload().clone(),
                },
            )),
        },
        Step::Sleep(duration) => {
            std::thread::sleep(*duration);
            Ok((None, Verdict::Passed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::scenario::{presets, Endpoint};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Bind an ephemeral port and point `scenario` at it.
    fn bind_for(mut scenario: Scenario) -> (TcpListener, Scenario) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        scenario.endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        (listener, scenario)
    }

    fn read_n(stream: &mut std::net::TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_dummy_exchange_success() {
        let (listener, scenario) = bind_for(presets::dummy());

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            assert_eq!(read_n(&mut stream, 12), b"+hello world");
            assert_eq!(read_n(&mut stream, 7), b"-123neg");
            stream.write_all(b"+some data").unwrap();

            // The runner releases the connection once the last step is done.
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            rest
        });

        let report = Runner::new(scenario).run().unwrap();
        let trailing = peer.join().unwrap();

        assert!(trailing.is_empty());
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.sent(), 2);
        assert_eq!(report.matched(), 1);
        assert_eq!(report.mismatches(), 0);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_dummy_exchange_mismatch_is_lenient() {
        let (listener, scenario) = bind_for(presets::dummy());

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_n(&mut stream, 19);
            stream.write_all(b"+other data").unwrap();
        });

        let report = Runner::new(scenario).run().unwrap();
        peer.join().unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.mismatches(), 1);
        let last = report.outcomes.last().unwrap();
        assert_eq!(
            last.verdict,
            Verdict::Mismatch {
                expected: Bytes::from_static(b"+some data")
            }
        );
    }

    #[test]
    fn test_strict_mismatch_stops_and_closes() {
        let scenario = Scenario::new("strict", Endpoint::new("127.0.0.1", 0))
            .strict()
            .send(Message::from_static("login", presets::LOGIN))
            .recv(Message::from_static("login_ack", presets::LOGIN_ACK))
            .send(Message::from_static("heartbeat", presets::HEARTBEAT));
        let (listener, scenario) = bind_for(scenario);

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_n(&mut stream, presets::LOGIN.len());
            stream.write_all(b"\x0C\x00\x00\x00\x04").unwrap();

            // No heartbeat may follow; the client closes instead.
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            rest
        });

        let report = Runner::new(scenario).run().unwrap();
        let trailing = peer.join().unwrap();

        assert!(trailing.is_empty());
        assert_eq!(report.status, RunStatus::Mismatched { step: 1 });
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            report.into_result(),
            Err(ExchangeError::Mismatch { step: 1, .. })
        ));
    }

    #[test]
    fn test_echo_reply_before_next_send() {
        let (listener, scenario) = bind_for(presets::echo());

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            for _ in 0..3 {
                let n = stream.read(&mut buf).unwrap();
                seen.push(buf[..n].to_vec());
                stream.write_all(&buf[..n]).unwrap();
            }
            seen
        });

        let report = Runner::new(scenario).run().unwrap();
        let seen = peer.join().unwrap();

        assert_eq!(
            seen,
            vec![
                b"+some data here\r\n".to_vec(),
                b"+another data\r\n".to_vec(),
                b"-12341241\r\n".to_vec(),
            ]
        );
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.matched(), 3);
    }

    #[test]
    fn test_connect_failure_is_error() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut scenario = presets::dummy();
        scenario.endpoint = Endpoint::new("127.0.0.1", port);

        let err = Runner::new(scenario).run().unwrap_err();
        assert!(matches!(err, ExchangeError::Connect { .. }));
    }

    #[test]
    fn test_peer_close_ends_strict_run() {
        let scenario = Scenario::new("reset", Endpoint::new("127.0.0.1", 0))
            .strict()
            .recv_any()
            .recv(Message::from_static("ack", b"+OK\r\n"))
            .sleep(Duration::from_millis(20))
            .send(Message::from_static("late", b"late"));
        let (listener, scenario) = bind_for(scenario);

        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let report = Runner::new(scenario).run().unwrap();
        peer.join().unwrap();

        // recv any records the empty read; the exact recv then sees EOF.
        assert_eq!(report.status, RunStatus::Mismatched { step: 1 });
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].bytes.as_deref(), Some(&b""[..]));
        assert_eq!(report.outcomes[1].bytes.as_deref(), Some(&b""[..]));
        assert!(report.outcomes.iter().all(|o| o.kind != "send"));
    }
}
