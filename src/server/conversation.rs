//! Plays scenario steps over one accepted stream.
//!
//! Receives accumulate into a buffer until the expected number of bytes is
//! present, so replies split across segments still match. Bytes beyond the
//! expected message stay buffered for the next step.

use crate::message::{Escaped, Message};
use crate::outcome::{Received, StepOutcome, Verdict};
use crate::scenario::{Expect, Step};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors that end a conversation.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("connection closed by peer")]
    Closed,
    #[error("connection reset by peer")]
    Reset,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One scripted conversation with a connected client.
#[derive(Debug)]
pub struct Conversation<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> Conversation<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, recv_buffer: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(recv_buffer.max(8 * 1024)),
        }
    }

    /// Play `steps` in order, stopping at the first step that does not pass.
    ///
    /// `on_step` is called with each step index before it runs.
    pub async fn play(
        &mut self,
        steps: &[Step],
        mut on_step: impl FnMut(usize),
    ) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            on_step(index);
            let started_at = Utc::now();
            let start = Instant::now();

            let (bytes, verdict) = match self.execute(step).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(step = index, error = %e, "Conversation step failed");
                    (None, Verdict::Failed(e.to_string()))
                }
            };

            let passed = verdict == Verdict::Passed;
            outcomes.push(StepOutcome {
                index,
                kind: step.kind(),
                label: step.to_string(),
                started_at,
                elapsed: start.elapsed(),
                bytes,
                verdict,
            });

            if !passed {
                break;
            }
        }

        outcomes
    }

    async fn execute(&mut self, step: &Step) -> Result<(Option<Bytes>, Verdict), ConversationError> {
        match step {
            Step::Send(msg) => {
                self.send(msg).await?;
                Ok((Some(msg.payload().clone()), Verdict::Passed))
            }
            Step::Recv(Expect::Any) => {
                let received = self.recv_any().await?;
                Ok((Some(received), Verdict::Passed))
            }
            Step::Recv(Expect::Exact(expected)) => match self.recv_exact(expected).await? {
                Received::Matched(b) => Ok((Some(b), Verdict::Passed)),
                Received::Mismatch(b) => Ok((
                    Some(b),
                    Verdict::Mismatch {
                        expected: expected.payload().clone(),
                    },
                )),
            },
            Step::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok((None, Verdict::Passed))
            }
        }
    }

    /// Write a message and flush.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ConversationError> {
        self.stream.write_all(msg.payload()).await?;
        self.stream.flush().await?;
        info!(message = msg.name(), "send: {}", Escaped(msg.payload()));
        Ok(())
    }

    /// Take whatever is buffered, or the result of the next read.
    pub async fn recv_any(&mut self) -> Result<Bytes, ConversationError> {
        if self.buffer.is_empty() && self.stream.read_buf(&mut self.buffer).await? == 0 {
            return Err(ConversationError::Closed);
        }

        let received = self.buffer.split().freeze();
        info!("recv: {}", Escaped(&received));
        Ok(received)
    }

    /// Wait until `expected.len()` bytes are buffered and compare them.
    ///
    /// Returns early with a mismatch once the buffered bytes can no longer
    /// become the expected message.
    pub async fn recv_exact(&mut self, expected: &Message) -> Result<Received, ConversationError> {
        let want = expected.payload();

        loop {
            if let Some(received) = self.check_buffered(want) {
                match &received {
                    Received::Matched(b) => {
                        info!(message = expected.name(), "recv: {}", Escaped(b))
                    }
                    Received::Mismatch(b) => warn!(
                        message = expected.name(),
                        expected = %Escaped(want),
                        "wrong message recv: {}",
                        Escaped(b)
                    ),
                }
                return Ok(received);
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Err(ConversationError::Closed);
                }
                return Err(ConversationError::Reset);
            }
        }
    }

    fn check_buffered(&mut self, want: &Bytes) -> Option<Received> {
        if self.buffer.len() >= want.len() {
            if self.buffer[..want.len()] == want[..] {
                return Some(Received::Matched(self.buffer.split_to(want.len()).freeze()));
            }
            return Some(Received::Mismatch(self.buffer.split().freeze()));
        }

        if !want.starts_with(&self.buffer) {
            return Some(Received::Mismatch(self.buffer.split().freeze()));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::presets;
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn steps_for_logon() -> Vec<Step> {
        vec![
            Step::Recv(Expect::Exact(Message::from_static("login", presets::LOGIN))),
            Step::Send(Message::from_static("login_ack", presets::LOGIN_ACK)),
            Step::Recv(Expect::Exact(Message::from_static(
                "heartbeat",
                presets::HEARTBEAT,
            ))),
        ]
    }

    #[tokio::test]
    async fn test_logon_conversation() {
        let mock = Builder::new()
            .read(&presets::LOGIN[..10])
            .read(&presets::LOGIN[10..])
            .write(presets::LOGIN_ACK)
            .read(presets::HEARTBEAT)
            .build();

        let mut conversation = Conversation::new(mock, 1024);
        let mut seen = Vec::new();
        let outcomes = conversation
            .play(&steps_for_logon(), |i| seen.push(i))
            .await;

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Passed));
        assert_eq!(outcomes[0].bytes.as_deref(), Some(presets::LOGIN));
    }

    #[tokio::test]
    async fn test_wrong_login_stops_conversation() {
        let mock = Builder::new().read(b"\x14\x00\x00\x00\x09").build();

        let mut conversation = Conversation::new(mock, 1024);
        let outcomes = conversation.play(&steps_for_logon(), |_| {}).await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].verdict, Verdict::Mismatch { .. }));
        assert_eq!(
            outcomes[0].bytes.as_deref(),
            Some(&b"\x14\x00\x00\x00\x09"[..])
        );
    }

    #[tokio::test]
    async fn test_surplus_kept_for_next_step() {
        let mock = Builder::new().read(b"+hello world-123neg").build();
        let steps = vec![
            Step::Recv(Expect::Exact(Message::from_static("hello", b"+hello world"))),
            Step::Recv(Expect::Exact(Message::from_static("neg", b"-123neg"))),
        ];

        let mut conversation = Conversation::new(mock, 1024);
        let outcomes = conversation.play(&steps, |_| {}).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].bytes.as_deref(), Some(&b"-123neg"[..]));
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Passed));
    }

    #[tokio::test]
    async fn test_closed_before_message() {
        let mock = Builder::new().build();
        let mut conversation = Conversation::new(mock, 1024);
        let err = conversation
            .recv_exact(&Message::from_static("hello", b"+hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Closed));
    }

    #[tokio::test]
    async fn test_empty_expectation_matches_without_read() {
        let mock = Builder::new().build();
        let mut conversation = Conversation::new(mock, 1024);
        let received = conversation
            .recv_exact(&Message::from_static("nothing", b""))
            .await
            .unwrap();
        assert_eq!(received, Received::Matched(Bytes::new()));
    }

    #[tokio::test]
    async fn test_reset_mid_message() {
        let mock = Builder::new().read(b"+hel").build();
        let mut conversation = Conversation::new(mock, 1024);
        let err = conversation
            .recv_exact(&Message::from_static("hello", b"+hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Reset));
    }

    #[tokio::test]
    async fn test_recv_any_then_sleep_then_send() {
        let mock = Builder::new()
            .read(b"+some data here\r\n")
            .write(b"+OK\r\n")
            .build();
        let steps = vec![
            Step::Recv(Expect::Any),
            Step::Sleep(Duration::from_millis(1)),
            Step::Send(Message::from_static("ok", b"+OK\r\n")),
        ];

        let mut conversation = Conversation::new(mock, 1024);
        let outcomes = conversation.play(&steps, |_| {}).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].bytes.as_deref(), Some(&b"+some data here\r\n"[..]));
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Passed));
    }
}
