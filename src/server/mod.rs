//! Mock peer: a TCP server that plays a scenario with every client.
//!
//! Accepts connections until shutdown is signalled, keeping at most
//! `max_connections` conversations alive at once. Each conversation runs
//! on its own task, so a client that mismatches or disconnects never
//! affects the others.

mod conversation;
mod registry;

pub use conversation::{Conversation, ConversationError};
pub use registry::{ConnState, ConnectionRegistry, PeerConnection};

use crate::outcome::{StepOutcome, Verdict};
use crate::report::Reporter;
use crate::scenario::Scenario;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

/// Default limit on concurrent conversations.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Accept backoff gives up once the delay would exceed this many seconds.
const MAX_ACCEPT_BACKOFF_SECS: u64 = 64;

/// Mock peer errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),
    #[error("connection limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

/// Mock peer settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_connections: usize,
    /// Base path for per-connection JUnit reports.
    pub report_path: Option<PathBuf>,
    pub shutdown: Arc<Notify>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            report_path: None,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// Mock peer instance.
#[derive(Debug)]
pub struct MockServer {
    listener: TcpListener,
    scenario: Arc<Scenario>,
    config: ServerConfig,
    limit_conns: Arc<Semaphore>,
    registry: Arc<Mutex<ConnectionRegistry>>,
    next_id: u64,
}

impl MockServer {
    /// Bind `addr` and create a server for `scenario`.
    pub async fn bind(
        addr: &str,
        scenario: Scenario,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::new(listener, scenario, config))
    }

    pub fn new(listener: TcpListener, scenario: Scenario, config: ServerConfig) -> Self {
        let max = config.max_connections.max(1);
        Self {
            listener,
            scenario: Arc::new(scenario),
            limit_conns: Arc::new(Semaphore::new(max)),
            registry: Arc::new(Mutex::new(ConnectionRegistry::new(max))),
            config,
            next_id: 0,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown is notified.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!(
            addr = ?self.listener.local_addr().ok(),
            scenario = %self.scenario.name,
            steps = self.scenario.steps.len(),
            max_connections = self.config.max_connections,
            "Mock peer accepting connections"
        );

        let shutdown = Arc::clone(&self.config.shutdown);

        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.limit_conns).acquire_owned() => permit?,
                _ = shutdown.notified() => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = self.accept() => accepted?,
                _ = shutdown.notified() => break,
            };

            let id = self.next_id;
            self.next_id += 1;
            debug!(id, peer = %peer, "New connection");

            let scenario = Arc::clone(&self.scenario);
            let registry = Arc::clone(&self.registry);
            let report_path = self.config.report_path.clone();

            tokio::spawn(async move {
                handle_connection(id, stream, peer, scenario, registry, report_path).await;
                drop(permit);
            });
        }

        info!("Mock peer shutting down");
        log_live_connections(&self.registry);
        Ok(())
    }

    /// Accept with exponential backoff on transient errors.
    async fn accept(&mut self) -> Result<(TcpStream, std::net::SocketAddr), ServerError> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(e) => {
                    if backoff > MAX_ACCEPT_BACKOFF_SECS {
                        return Err(ServerError::Accept(e));
                    }
                    warn!(error = %e, backoff_secs = backoff, "Accept failed, retrying");
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

async fn handle_connection(
    id: u64,
    stream: TcpStream,
    peer: std::net::SocketAddr,
    scenario: Arc<Scenario>,
    registry: Arc<Mutex<ConnectionRegistry>>,
    report_path: Option<PathBuf>,
) {
    let (key, active, capacity) = with_registry(&registry, |r| {
        (r.insert(PeerConnection::new(id, peer)), r.len(), r.capacity())
    })
    .unwrap_or_default();
    info!(id, peer = %peer, active, capacity, "Conversation started");

    let mut conversation = Conversation::new(stream, scenario.recv_buffer);
    let outcomes = conversation
        .play(&scenario.steps, |step| {
            if let Some(key) = key {
                with_registry(&registry, |r| r.set_state(key, ConnState::Playing { step }));
            }
        })
        .await;

    let conn = key.and_then(|key| with_registry(&registry, |r| r.remove(key)).flatten());
    if let Some(conn) = conn {
        debug!(
            id,
            peer = %conn.peer,
            state = ?conn.state,
            duration_ms = conn.age().num_milliseconds(),
            "Conversation released"
        );
    }

    log_summary(id, &scenario, &outcomes);

    if let Some(base) = report_path {
        let mut reporter = Reporter::new(&format!("{}-{}", scenario.name, id));
        reporter.record_all(&outcomes);
        if let Err(e) = reporter.write(&connection_report_path(&base, id)) {
            error!(id, error = %e, "Failed to write report");
        }
    }
}

fn with_registry<T>(
    registry: &Mutex<ConnectionRegistry>,
    f: impl FnOnce(&mut ConnectionRegistry) -> T,
) -> Option<T> {
    match registry.lock() {
        Ok(mut guard) => Some(f(&mut guard)),
        Err(_) => {
            error!("Connection registry lock poisoned");
            None
        }
    }
}

fn log_live_connections(registry: &Mutex<ConnectionRegistry>) {
    with_registry(registry, |r| {
        for conn in r.iter() {
            let ConnState::Playing { step } = conn.state;
            warn!(
                id = conn.id,
                peer = %conn.peer,
                step,
                age_ms = conn.age().num_milliseconds(),
                "Conversation still live at shutdown"
            );
        }
    });
}

fn log_summary(id: u64, scenario: &Scenario, outcomes: &[StepOutcome]) {
    let completed = outcomes.len() == scenario.steps.len()
        && outcomes.iter().all(|o| o.verdict == Verdict::Passed);

    if completed {
        info!(id, steps = outcomes.len(), "Conversation completed");
    } else if let Some(last) = outcomes.last() {
        warn!(
            id,
            step = last.index,
            label = %last.label,
            verdict = ?last.verdict,
            "Conversation ended early"
        );
    }
}

/// `result.xml` becomes `result-3.xml` for connection 3.
pub fn connection_report_path(base: &Path, id: u64) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());

    let file_name = match base.extension() {
        Some(ext) => format!("{stem}-{id}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{id}"),
    };

    base.with_file_name(file_name)
}

/// Bind and run a mock peer until Ctrl-C.
pub async fn run_mock_server(
    addr: &str,
    scenario: Scenario,
    config: ServerConfig,
) -> Result<(), ServerError> {
    let shutdown = Arc::clone(&config.shutdown);
    let mut server = MockServer::bind(addr, scenario, config).await?;

    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => return res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            shutdown.notify_one();
        }
    }

    // Let the accept loop observe shutdown and log what is still live.
    run.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::scenario::Endpoint;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn echo_once() -> Scenario {
        Scenario::new("echo-once", Endpoint::new("127.0.0.1", 0))
            .recv(Message::from_static("hello", b"+hello world"))
            .send(Message::from_static("some_data", b"+some data"))
    }

    #[test]
    fn test_connection_report_path() {
        assert_eq!(
            connection_report_path(Path::new("/tmp/result.xml"), 3),
            PathBuf::from("/tmp/result-3.xml")
        );
        assert_eq!(
            connection_report_path(Path::new("report"), 0),
            PathBuf::from("report-0")
        );
    }

    #[tokio::test]
    async fn test_serves_scenario_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("result.xml");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            report_path: Some(report.clone()),
            ..ServerConfig::default()
        };
        let shutdown = Arc::clone(&config.shutdown);
        let mut server = MockServer::new(listener, echo_once(), config);
        let addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"+hello world").await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+some data");
        drop(client);

        let expected = dir.path().join("result-0.xml");
        for _ in 0..50 {
            if expected.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let xml = std::fs::read_to_string(&expected).unwrap();
        assert!(xml.contains("echo-once-0"));
        assert!(!xml.contains("<failure"));

        shutdown.notify_one();
        server_task.await.unwrap().unwrap();
    }

    async fn wait_for_states(
        registry: &Mutex<ConnectionRegistry>,
        want: &[ConnState],
    ) -> bool {
        for _ in 0..100 {
            let states: Vec<ConnState> = registry
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.state)
                .collect();
            if states == want {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_registry_tracks_conversation_progress() {
        let scenario = echo_once().recv(Message::from_static("negative", b"-123neg"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig::default();
        let shutdown = Arc::clone(&config.shutdown);
        let mut server = MockServer::new(listener, scenario, config);
        let addr = server.local_addr().unwrap();
        let registry = Arc::clone(&server.registry);

        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert!(wait_for_states(&registry, &[ConnState::Playing { step: 0 }]).await);

        client.write_all(b"+hello world").await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert!(wait_for_states(&registry, &[ConnState::Playing { step: 2 }]).await);

        client.write_all(b"-123neg").await.unwrap();
        assert!(wait_for_states(&registry, &[]).await);

        shutdown.notify_one();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_mismatch_closes_only_that_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig::default();
        let shutdown = Arc::clone(&config.shutdown);
        let mut server = MockServer::new(listener, echo_once(), config);
        let addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move { server.run().await });

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"-wrong").await.unwrap();
        let mut rest = Vec::new();
        bad.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(b"+hello world").await.unwrap();
        let mut reply = [0u8; 10];
        good.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+some data");

        shutdown.notify_one();
        server_task.await.unwrap().unwrap();
    }
}
