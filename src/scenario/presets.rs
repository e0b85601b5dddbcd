//! Built-in exchanges.
//!
//! - `echo`: three CRLF-terminated lines to port 6000, one reply read after
//!   each send, replies only logged.
//! - `dummy`: two sends to port 6020, then one reply that must equal
//!   `+some data`.
//! - `sbe`: SBE-style logon on port 6020. The ack must match exactly before
//!   three heartbeats are sent two seconds apart.

use super::{Endpoint, Scenario};
use crate::message::Message;
use std::time::Duration;

pub const LOCALHOST: &str = "127.0.0.1";
pub const ECHO_PORT: u16 = 6000;
pub const EXCHANGE_PORT: u16 = 6020;

pub const LOGIN: &[u8] =
    b"\x14\x00\x00\x00\x02\x00\x01\x00\x00\x00user1\x00pass1\x00\x39\x30\x00\x00";
pub const LOGIN_ACK: &[u8] = b"\x0C\x00\x00\x00\x03\x00\x01\x00\x00\x00\x01\x00\x39\x30\x00\x00";
pub const HEARTBEAT: &[u8] = b"\x08\x00\x00\x00\x01\x00\x01\x00\x00\x00";

/// Pause between login and reading the ack.
pub const ACK_DELAY: Duration = Duration::from_millis(200);
/// Pause before each heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
pub const HEARTBEAT_COUNT: usize = 3;

/// Selectable built-in scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    Echo,
    Dummy,
    Sbe,
}

impl Preset {
    pub fn scenario(self) -> Scenario {
        match self {
            Preset::Echo => echo(),
            Preset::Dummy => dummy(),
            Preset::Sbe => sbe(),
        }
    }
}

/// Line exchange against an echo-style peer.
pub fn echo() -> Scenario {
    let lines: [(&str, &'static [u8]); 3] = [
        ("line1", b"+some data here\r\n"),
        ("line2", b"+another data\r\n"),
        ("line3", b"-12341241\r\n"),
    ];

    lines.into_iter().fold(
        Scenario::new("echo", Endpoint::new(LOCALHOST, ECHO_PORT)),
        |scenario, (name, payload)| scenario.send(Message::from_static(name, payload)).recv_any(),
    )
}

/// Two sends followed by one literal reply check.
pub fn dummy() -> Scenario {
    Scenario::new("dummy", Endpoint::new(LOCALHOST, EXCHANGE_PORT))
        .send(Message::from_static("hello", b"+hello world"))
        .send(Message::from_static("negative", b"-123neg"))
        .recv(Message::from_static("some_data", b"+some data"))
}

/// Logon, ack check, then heartbeats.
pub fn sbe() -> Scenario {
    let logon = Scenario::new("sbe", Endpoint::new(LOCALHOST, EXCHANGE_PORT))
        .strict()
        .send(Message::from_static("login", LOGIN))
        .sleep(ACK_DELAY)
        .recv(Message::from_static("login_ack", LOGIN_ACK));

    (0..HEARTBEAT_COUNT).fold(logon, |scenario, _| {
        scenario
            .sleep(HEARTBEAT_INTERVAL)
            .send(Message::from_static("heartbeat", HEARTBEAT))
    })
}
