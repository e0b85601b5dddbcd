//! Scripted exchanges.
//!
//! A `Scenario` is an ordered list of steps played over one TCP connection:
//! send a payload, receive a reply (optionally checked byte-for-byte), or
//! pause. The same model drives both the exchange runner (client side) and
//! the mock peer (server side); the file states which side it is written for
//! only by the direction of its steps.

mod file;
pub mod presets;

pub use file::ScenarioError;
pub use presets::Preset;

use crate::message::Message;
use std::fmt;
use std::time::Duration;

/// Default receive buffer size for a single read.
pub const DEFAULT_RECV_BUFFER: usize = 1024;

/// Remote (or listen) address of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form suitable for address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a receive step expects from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Accept whatever a single read returns.
    Any,
    /// Require exactly these bytes.
    Exact(Message),
}

/// One action in a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(Message),
    Recv(Expect),
    Sleep(Duration),
}

impl Step {
    /// Short kind label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Send(_) => "send",
            Step::Recv(_) => "recv",
            Step::Sleep(_) => "sleep",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Send(msg) => write!(f, "send {}", msg.name()),
            Step::Recv(Expect::Any) => f.write_str("recv any"),
            Step::Recv(Expect::Exact(msg)) => write!(f, "recv {}", msg.name()),
            Step::Sleep(d) => write!(f, "sleep {}ms", d.as_millis()),
        }
    }
}

/// How a mismatched reply affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Log the mismatch and keep going.
    #[default]
    Lenient,
    /// Log the mismatch and stop the run.
    Strict,
}

/// A complete scripted exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub endpoint: Endpoint,
    pub keepalive: bool,
    pub recv_buffer: usize,
    pub strictness: Strictness,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Create an empty scenario with default settings.
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            keepalive: true,
            recv_buffer: DEFAULT_RECV_BUFFER,
            strictness: Strictness::Lenient,
            steps: Vec::new(),
        }
    }

    pub fn strict(mut self) -> Self {
        self.strictness = Strictness::Strict;
        self
    }

    pub fn send(mut self, msg: Message) -> Self {
        self.steps.push(Step::Send(msg));
        self
    }

    pub fn recv(mut self, msg: Message) -> Self {
        self.steps.push(Step::Recv(Expect::Exact(msg)));
        self
    }

    pub fn recv_any(mut self) -> Self {
        self.steps.push(Step::Recv(Expect::Any));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// Number of outbound messages in the script.
    pub fn send_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Send(_)))
            .count()
    }
}
