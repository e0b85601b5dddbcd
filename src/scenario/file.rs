//! TOML scenario files.
//!
//! ```toml
//! name = "logon"
//! strict = true
//!
//! [endpoint]
//! host = "127.0.0.1"
//! port = 6020
//!
//! [messages]
//! login = { hex = "14000000 0200 0100 0000" }
//! hello = { text = "+hello world" }
//!
//! [[steps]]
//! action = "send"
//! message = "login"
//!
//! [[steps]]
//! action = "sleep"
//! millis = 200
//!
//! [[steps]]
//! action = "recv"   # no message: accept any reply
//! repeat = 2
//! ```

use super::{Endpoint, Expect, Scenario, Step, Strictness, DEFAULT_RECV_BUFFER};
use crate::message::{HexError, Message};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Scenario loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse scenario: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("message '{0}' must set exactly one of `text` or `hex`")]
    AmbiguousMessage(String),
    #[error("message '{name}' has invalid hex: {source}")]
    InvalidHex { name: String, source: HexError },
    #[error("step {step} references unknown message '{name}'")]
    UnknownMessage { step: usize, name: String },
    #[error("step {0} has repeat = 0")]
    ZeroRepeat(usize),
    #[error("recv_buffer must be greater than zero")]
    ZeroRecvBuffer,
    #[error("scenario has no steps")]
    NoSteps,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    name: Option<String>,
    #[serde(default)]
    endpoint: EndpointSection,
    #[serde(default = "default_keepalive")]
    keepalive: bool,
    #[serde(default = "default_recv_buffer")]
    recv_buffer: usize,
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    messages: HashMap<String, MessageSpec>,
    #[serde(default)]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
struct EndpointSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageSpec {
    text: Option<String>,
    hex: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum StepSpec {
    Send {
        message: String,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    Recv {
        message: Option<String>,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    Sleep {
        millis: u64,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
}

fn default_keepalive() -> bool {
    true
}

fn default_recv_buffer() -> usize {
    DEFAULT_RECV_BUFFER
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6020
}

fn default_repeat() -> u32 {
    1
}

impl Scenario {
    /// Load a scenario from a TOML file.
    ///
    /// The file stem names the scenario when the file has no `name` key.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ScenarioError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut scenario = Self::from_toml_str(&contents)?;
        if scenario.name.is_empty() {
            if let Some(stem) = path.file_stem() {
                scenario.name = stem.to_string_lossy().into_owned();
            }
        }

        debug!(path = %path.display(), steps = scenario.steps.len(), "Loaded scenario");
        Ok(scenario)
    }

    /// Parse a scenario from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ScenarioError> {
        let parsed: ScenarioFile = toml::from_str(contents)?;
        parsed.resolve()
    }
}

impl ScenarioFile {
    fn resolve(self) -> Result<Scenario, ScenarioError> {
        if self.recv_buffer == 0 {
            return Err(ScenarioError::ZeroRecvBuffer);
        }
        if self.steps.is_empty() {
            return Err(ScenarioError::NoSteps);
        }

        let mut messages = HashMap::with_capacity(self.messages.len());
        for (name, spec) in self.messages {
            let msg = match (spec.text, spec.hex) {
                (Some(text), None) => Message::new(name.clone(), text),
                (None, Some(hex)) => Message::from_hex(name.clone(), &hex)
                    .map_err(|source| ScenarioError::InvalidHex {
                        name: name.clone(),
                        source,
                    })?,
                _ => return Err(ScenarioError::AmbiguousMessage(name)),
            };
            messages.insert(name, msg);
        }

        let lookup = |step: usize, name: &str| {
            messages
                .get(name)
                .cloned()
                .ok_or_else(|| ScenarioError::UnknownMessage {
                    step,
                    name: name.to_string(),
                })
        };

        let mut steps = Vec::with_capacity(self.steps.len());
        for (idx, spec) in self.steps.iter().enumerate() {
            let (step, repeat) = match spec {
                StepSpec::Send { message, repeat } => (Step::Send(lookup(idx, message)?), *repeat),
                StepSpec::Recv { message, repeat } => {
                    let expect = match message {
                        Some(name) => Expect::Exact(lookup(idx, name)?),
                        None => Expect::Any,
                    };
                    (Step::Recv(expect), *repeat)
                }
                StepSpec::Sleep { millis, repeat } => {
                    (Step::Sleep(Duration::from_millis(*millis)), *repeat)
                }
            };

            if repeat == 0 {
                return Err(ScenarioError::ZeroRepeat(idx));
            }
            steps.extend(std::iter::repeat(step).take(repeat as usize));
        }

        Ok(Scenario {
            name: self.name.unwrap_or_default(),
            endpoint: Endpoint::new(self.endpoint.host, self.endpoint.port),
            keepalive: self.keepalive,
            recv_buffer: self.recv_buffer,
            strictness: if self.strict {
                Strictness::Strict
            } else {
                Strictness::Lenient
            },
            steps,
        })
    }
}
