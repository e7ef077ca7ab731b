//! Synchronous command channel to the detector's control endpoint.
//!
//! One persistent TCP connection carrying strict request/response text
//! traffic. The link is half-duplex with no request identifiers, so the
//! whole write+read exchange runs under one lock; a second concurrent
//! caller would otherwise pair its request with the wrong reply.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, UltraError};
use crate::protocol::{MAX_REPLY, TERMINATOR};

/// Command link to the detector head.
///
/// Holds at most one live connection. Exchanges are serialized internally,
/// so the channel can be shared across threads by reference.
pub struct CommandChannel {
    link: Mutex<Option<TcpStream>>,
}

impl CommandChannel {
    /// Create an unconnected channel.
    pub fn new() -> Self {
        Self {
            link: Mutex::new(None),
        }
    }

    /// Connect to the control endpoint.
    ///
    /// Fails if the channel is already connected, if the address does not
    /// resolve, or if the connection is refused. Nagle coalescing is
    /// disabled on success; command traffic is short and latency-bound.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        let mut link = self.link.lock();
        if link.is_some() {
            return Err(UltraError::AlreadyConnected);
        }

        let addr_text = format!("{host}:{port}");
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| UltraError::Connection {
                addr: addr_text.clone(),
                message: format!("address resolution failed: {e}"),
            })?
            .next()
            .ok_or_else(|| UltraError::Connection {
                addr: addr_text.clone(),
                message: "address resolved to nothing".to_string(),
            })?;

        let stream = TcpStream::connect(addr).map_err(|e| UltraError::Connection {
            addr: addr_text.clone(),
            message: format!("connection refused: {e}"),
        })?;
        stream.set_nodelay(true).map_err(|e| UltraError::Connection {
            addr: addr_text.clone(),
            message: format!("failed to set TCP_NODELAY: {e}"),
        })?;

        debug!(addr = %addr_text, "command channel connected");
        *link = Some(stream);
        Ok(())
    }

    /// Drop the connection if one is live. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut link = self.link.lock();
        if let Some(stream) = link.take() {
            // Orderly shutdown; the peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("command channel disconnected");
        }
    }

    /// Whether a connection is currently live.
    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Send one command and block for its reply.
    ///
    /// The reply is whatever arrives in a single read of up to
    /// [`MAX_REPLY`] bytes. The firmware answers every request in one
    /// burst that fits this cap; there is no framing to reassemble.
    pub fn send_wait(&self, command: &str) -> Result<String> {
        let mut link = self.link.lock();
        let stream = link.as_mut().ok_or(UltraError::NotConnected)?;

        trace!(command, "send_wait");
        let request = format!("{command}{TERMINATOR}");
        stream
            .write_all(request.as_bytes())
            .map_err(|e| UltraError::Transport {
                operation: "command write",
                message: e.to_string(),
            })?;

        let mut buf = [0u8; MAX_REPLY];
        let count = stream.read(&mut buf).map_err(|e| UltraError::Transport {
            operation: "reply read",
            message: e.to_string(),
        })?;
        if count == 0 {
            return Err(UltraError::Transport {
                operation: "reply read",
                message: "connection closed by detector".to_string(),
            });
        }

        let reply = String::from_utf8_lossy(&buf[..count]).into_owned();
        trace!(reply, "send_wait reply");
        Ok(reply)
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn echo_server() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, "127.0.0.1".to_string(), port)
    }

    #[test]
    fn send_wait_round_trip() {
        let (listener, host, port) = echo_server();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"read coldtemp\r\n");
            socket.write_all(b"<3.14").unwrap();
        });

        let channel = CommandChannel::new();
        channel.connect(&host, port).unwrap();
        let reply = channel.send_wait("read coldtemp").unwrap();
        assert_eq!(reply, "<3.14");
        server.join().unwrap();
    }

    #[test]
    fn second_connect_rejected() {
        let (listener, host, port) = echo_server();
        let server = thread::spawn(move || {
            let (_socket, _) = listener.accept().unwrap();
        });

        let channel = CommandChannel::new();
        channel.connect(&host, port).unwrap();
        assert!(matches!(
            channel.connect(&host, port),
            Err(UltraError::AlreadyConnected)
        ));
        server.join().unwrap();
    }

    #[test]
    fn disconnect_is_idempotent() {
        let channel = CommandChannel::new();
        channel.disconnect();
        channel.disconnect();
        assert!(!channel.is_connected());
    }

    #[test]
    fn send_wait_requires_connection() {
        let channel = CommandChannel::new();
        assert!(matches!(
            channel.send_wait("read coldtemp"),
            Err(UltraError::NotConnected)
        ));
    }

    #[test]
    fn closed_peer_reports_transport_error() {
        let (listener, host, port) = echo_server();
        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            drop(socket);
        });

        let channel = CommandChannel::new();
        channel.connect(&host, port).unwrap();
        server.join().unwrap();
        // Reply read observes EOF once the peer is gone.
        let result = channel.send_wait("read coldtemp");
        assert!(matches!(
            result,
            Err(UltraError::Transport { .. })
        ));
    }
}
