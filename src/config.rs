//! Configuration module for wire-rehearsal.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over whatever the selected scenario declares.

use crate::scenario::{Preset, Scenario, ScenarioError, Strictness};
use crate::server::DEFAULT_MAX_CONNECTIONS;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "wire-rehearsal")]
#[command(author = "wire-rehearsal authors")]
#[command(version = "0.1.0")]
#[command(about = "Scripted TCP exchange runner and mock peer", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a peer and play a scenario
    Run(RunArgs),
    /// Listen and play a scenario with every client that connects
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Built-in scenario (defaults to `dummy` when no scenario file is given)
    #[arg(long, value_enum, conflicts_with = "scenario")]
    pub preset: Option<Preset>,

    /// Path to a TOML scenario file
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Peer host
    #[arg(long)]
    pub host: Option<String>,

    /// Peer port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stop at the first mismatched reply
    #[arg(long, conflicts_with = "lenient")]
    pub strict: bool,

    /// Log mismatched replies and continue
    #[arg(long)]
    pub lenient: bool,

    /// Do not set SO_KEEPALIVE on the connection
    #[arg(long)]
    pub no_keepalive: bool,

    /// Size of a single receive read in bytes
    #[arg(long)]
    pub recv_buffer: Option<usize>,

    /// JUnit report path
    #[arg(short, long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to a TOML scenario file, written from the server's side
    #[arg(short, long)]
    pub scenario: PathBuf,

    /// Address to listen on (defaults to the scenario endpoint)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum concurrent conversations
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Base path for per-connection JUnit reports
    #[arg(short, long)]
    pub report: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Overrides applied to client scenarios
#[derive(Debug, Deserialize, Default)]
pub struct ClientSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub keepalive: Option<bool>,
    pub recv_buffer: Option<usize>,
    pub strict: Option<bool>,
}

/// Mock peer settings
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    pub listen: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Report settings
#[derive(Debug, Deserialize, Default)]
pub struct ReportSection {
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved client run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scenario: Scenario,
    pub report: Option<PathBuf>,
}

/// Resolved mock peer
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub scenario: Scenario,
    pub listen: String,
    pub max_connections: usize,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Run(RunConfig),
    Serve(ServeConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref path) => TomlConfig::load(path)?,
            None => TomlConfig::default(),
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            toml_config.logging.level
        };

        let mode = match cli.command {
            Command::Run(args) => {
                Mode::Run(resolve_run(args, toml_config.client, toml_config.report)?)
            }
            Command::Serve(args) => {
                Mode::Serve(resolve_serve(args, toml_config.server, toml_config.report)?)
            }
        };

        Ok(Config { log_level, mode })
    }
}

impl TomlConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_run(
    args: RunArgs,
    client: ClientSection,
    report: ReportSection,
) -> Result<RunConfig, ConfigError> {
    let mut scenario = match (&args.scenario, args.preset) {
        (Some(path), _) => Scenario::load(path)?,
        (None, Some(preset)) => preset.scenario(),
        (None, None) => Preset::Dummy.scenario(),
    };

    if let Some(host) = args.host.or(client.host) {
        scenario.endpoint.host = host;
    }
    if let Some(port) = args.port.or(client.port) {
        scenario.endpoint.port = port;
    }

    if args.no_keepalive {
        scenario.keepalive = false;
    } else if let Some(keepalive) = client.keepalive {
        scenario.keepalive = keepalive;
    }

    if let Some(recv_buffer) = args.recv_buffer.or(client.recv_buffer) {
        if recv_buffer == 0 {
            return Err(ConfigError::ZeroRecvBuffer);
        }
        scenario.recv_buffer = recv_buffer;
    }

    let strict = if args.strict {
        Some(true)
    } else if args.lenient {
        Some(false)
    } else {
        client.strict
    };
    if let Some(strict) = strict {
        scenario.strictness = if strict {
            Strictness::Strict
        } else {
            Strictness::Lenient
        };
    }

    Ok(RunConfig {
        scenario,
        report: args.report.or(report.path),
    })
}

fn resolve_serve(
    args: ServeArgs,
    server: ServerSection,
    report: ReportSection,
) -> Result<ServeConfig, ConfigError> {
    let scenario = Scenario::load(&args.scenario)?;
    let listen = args
        .listen
        .or(server.listen)
        .unwrap_or_else(|| scenario.endpoint.address());
    let max_connections = args.max_connections.unwrap_or(server.max_connections);
    if max_connections == 0 {
        return Err(ConfigError::ZeroMaxConnections);
    }

    Ok(ServeConfig {
        scenario,
        listen,
        max_connections,
        report: args.report.or(report.path),
    })
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("recv_buffer must be greater than zero")]
    ZeroRecvBuffer,
    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,
}
