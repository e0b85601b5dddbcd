//! A single blocking TCP session.
//!
//! The session owns its socket for its whole life and closes it when
//! dropped, so every exit path out of a run releases the connection once.

use super::ExchangeError;
use crate::frame::FrameHeader;
use crate::message::{Escaped, Message};
use crate::outcome::Received;
use crate::scenario::Endpoint;
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, info, trace, warn};

/// An open connection to one endpoint.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    recv_buffer: usize,
}

impl Session {
    /// Connect to `endpoint`, optionally enabling `SO_KEEPALIVE` first.
    ///
    /// Every resolved address is tried in order; the last error is returned
    /// if none accepts.
    pub fn connect(
        endpoint: &Endpoint,
        keepalive: bool,
        recv_buffer: usize,
    ) -> Result<Self, ExchangeError> {
        let connect_err = |source: io::Error| ExchangeError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };

        let addrs = endpoint.address().to_socket_addrs().map_err(connect_err)?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            match connect_socket(addr, keepalive) {
                Ok(stream) => {
                    info!(peer = %addr, keepalive, "Connected");
                    return Ok(Self {
                        stream,
                        peer: addr,
                        recv_buffer: recv_buffer.max(1),
                    });
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "Connect attempt failed");
                    last_err = e;
                }
            }
        }

        Err(connect_err(last_err))
    }

    /// Write the whole payload and flush.
    pub fn send(&mut self, msg: &Message) -> Result<(), ExchangeError> {
        self.stream
            .write_all(msg.payload())
            .and_then(|_| self.stream.flush())
            .map_err(ExchangeError::Io)?;

        match FrameHeader::peek(msg.payload()) {
            Some(header) if header.template_name().is_some() => {
                info!(message = msg.name(), frame = %header, "send: {}", Escaped(msg.payload()))
            }
            _ => info!(message = msg.name(), "send: {}", Escaped(msg.payload())),
        }
        Ok(())
    }

    /// Read one reply with a single read call of up to `recv_buffer` bytes.
    ///
    /// An empty result means the peer closed the connection.
    pub fn recv_any(&mut self) -> Result<Bytes, ExchangeError> {
        let mut buf = BytesMut::zeroed(self.recv_buffer);
        let n = self.stream.read(&mut buf).map_err(ExchangeError::Io)?;
        buf.truncate(n);

        let received = buf.freeze();
        if received.is_empty() {
            warn!("Peer closed connection before replying");
        } else {
            info!("recv: {}", Escaped(&received));
        }
        Ok(received)
    }

    /// Read until `expected` is fully received or the reply diverges from it.
    ///
    /// Reads stop as soon as the buffered bytes stop being a prefix of the
    /// expected message, or at end of stream, so a short wrong reply never
    /// blocks waiting for bytes that will not come. An empty expectation
    /// matches without reading.
    pub fn recv_exact(&mut self, expected: &Message) -> Result<Received, ExchangeError> {
        let want = expected.payload();
        if want.is_empty() {
            debug!(message = expected.name(), "Empty expectation, nothing to read");
            return Ok(Received::Matched(Bytes::new()));
        }
        let mut received = BytesMut::with_capacity(want.len().max(self.recv_buffer));
        let mut chunk = vec![0u8; self.recv_buffer];

        loop {
            let n = self.stream.read(&mut chunk).map_err(ExchangeError::Io)?;
            if n == 0 {
                trace!(buffered = received.len(), "End of stream while receiving");
                break;
            }
            received.extend_from_slice(&chunk[..n]);

            if received.len() >= want.len() || !want.starts_with(&received) {
                break;
            }
        }

        let received = received.freeze();
        if received == *want {
            info!(message = expected.name(), "recv: {}", Escaped(&received));
            Ok(Received::Matched(received))
        } else {
            warn!(
                message = expected.name(),
                expected = %Escaped(want),
                "wrong response recv: {}",
                Escaped(&received)
            );
            Ok(Received::Mismatch(received))
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Shutdown fails if the peer already reset; the fd is closed either way.
        let _ = self.stream.shutdown(Shutdown::Both);
        debug!(peer = %self.peer, "Session closed");
    }
}

fn connect_socket(addr: SocketAddr, keepalive: bool) -> io::Result<TcpStream> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    if keepalive {
        socket.set_keepalive(true)?;
    }
    socket.connect(&addr.into())?;

    Ok(socket.into())
}
