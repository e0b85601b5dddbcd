//! wire-rehearsal: scripted TCP exchange runner and mock peer
//!
//! Subcommands:
//! - `run`: connect to a peer and play a built-in or file scenario
//! - `serve`: listen and play a scenario with every client
//!
//! Configuration via CLI arguments or TOML file.

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wire_rehearsal::client::Runner;
use wire_rehearsal::config::{Config, Mode, RunConfig, ServeConfig};
use wire_rehearsal::report::Reporter;
use wire_rehearsal::server::{self, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Run(run) => run_client(run),
        Mode::Serve(serve) => run_server(serve),
    }
}

/// Play a scenario against a remote peer (blocking)
fn run_client(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = config.scenario;
    info!(
        scenario = %scenario.name,
        endpoint = %scenario.endpoint,
        keepalive = scenario.keepalive,
        recv_buffer = scenario.recv_buffer,
        strictness = ?scenario.strictness,
        "Starting wire-rehearsal client"
    );

    let report = Runner::new(scenario).run()?;

    if let Some(path) = &config.report {
        let mut reporter = Reporter::new(&report.scenario);
        reporter.record_all(&report.outcomes);
        reporter.write(path)?;
    }

    if report.mismatches() > 0 {
        warn!(mismatches = report.mismatches(), "Exchange had mismatched replies");
    }

    report.into_result()?;
    Ok(())
}

/// Run the mock peer until Ctrl-C
fn run_server(config: ServeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        scenario = %config.scenario.name,
        listen = %config.listen,
        max_connections = config.max_connections,
        "Starting wire-rehearsal mock peer"
    );

    let server_config = ServerConfig {
        max_connections: config.max_connections,
        report_path: config.report,
        ..ServerConfig::default()
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::run_mock_server(
        &config.listen,
        config.scenario,
        server_config,
    ))?;
    Ok(())
}
