//! Frame data channel.
//!
//! The detector streams one frame per UDP datagram to a socket we bind
//! locally: a 6-byte header (4-byte big-endian frame sequence number, 2-byte
//! frame-type tag, currently unused) followed by the pixel payload. Delivery
//! is best effort; the sequence number is the only loss detection there is,
//! and a detected gap invalidates the run — the protocol has no way to
//! request a resend.

use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use crate::error::{Result, UltraError};

/// Bytes of datagram header preceding the pixel payload.
pub const HEADER_LEN: usize = 6;

/// Receive buffer size requested on the data socket. Frame bursts arrive
/// faster than the consumer drains them; the kernel buffer absorbs the
/// difference.
const RECV_BUFFER_BYTES: usize = 32_000_000;

/// Frame-continuity tracker.
///
/// The first frame ever seen is exempt from validation; after that every
/// frame must follow its predecessor by exactly one. The tracker advances
/// to the received number even when reporting a gap, so a single gap is
/// reported once rather than on every subsequent frame.
#[derive(Debug)]
pub struct FrameSequence {
    first_frame: bool,
    last_frame: u32,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self {
            first_frame: true,
            last_frame: 0,
        }
    }

    /// Restore the first-frame exemption.
    pub fn reset(&mut self) {
        self.first_frame = true;
        self.last_frame = 0;
    }

    /// Record a received frame number, failing on a continuity gap.
    pub fn validate(&mut self, frame_number: u32) -> Result<()> {
        let gap = if self.first_frame {
            None
        } else {
            let expected = self.last_frame.wrapping_add(1);
            (frame_number != expected).then_some(expected)
        };
        self.first_frame = false;
        self.last_frame = frame_number;
        match gap {
            Some(expected) => Err(UltraError::Sequence {
                expected,
                received: frame_number,
            }),
            None => Ok(()),
        }
    }
}

impl Default for FrameSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of the frame stream.
pub struct DataChannel {
    socket: Option<UdpSocket>,
    sequence: FrameSequence,
    recv_buf: Vec<u8>,
}

impl DataChannel {
    /// Create an unbound channel.
    pub fn new() -> Self {
        Self {
            socket: None,
            sequence: FrameSequence::new(),
            recv_buf: Vec::new(),
        }
    }

    /// Bind the receive socket to a local address.
    ///
    /// A no-op when already bound; the socket is bound once per channel
    /// lifetime and never rebound. Port 0 binds an ephemeral port, visible
    /// through [`local_addr`](Self::local_addr).
    pub fn bind(&mut self, local_addr: &str, port: u16) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let addr_text = format!("{local_addr}:{port}");
        let addr: SocketAddr = addr_text.parse().map_err(|e| UltraError::Bind {
            addr: addr_text.clone(),
            message: format!("invalid local address: {e}"),
        })?;

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| {
                UltraError::Bind {
                    addr: addr_text.clone(),
                    message: format!("socket creation failed: {e}"),
                }
            })?;
        socket
            .set_recv_buffer_size(RECV_BUFFER_BYTES)
            .map_err(|e| UltraError::Bind {
                addr: addr_text.clone(),
                message: format!("failed to size receive buffer: {e}"),
            })?;
        socket.bind(&addr.into()).map_err(|e| UltraError::Bind {
            addr: addr_text.clone(),
            message: format!("bind failed: {e}"),
        })?;

        debug!(addr = %addr_text, "data socket bound");
        self.socket = Some(socket.into());
        Ok(())
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(UltraError::Transport {
            operation: "frame receive",
            message: "data socket is not bound".to_string(),
        })?;
        Ok(socket.local_addr()?)
    }

    /// Grant the sequence tracker a fresh first-frame exemption.
    pub fn reset_sequence(&mut self) {
        self.sequence.reset();
    }

    /// Block for one frame datagram and copy its payload into `dest`.
    ///
    /// `dest.len()` is the expected payload size; the datagram must carry
    /// exactly that many payload bytes after the header. Returns the frame
    /// sequence number. There is no receive timeout: a silent detector
    /// blocks the caller until a datagram arrives or the socket errors.
    pub fn receive_frame(&mut self, dest: &mut [u8]) -> Result<u32> {
        let socket = self.socket.as_ref().ok_or(UltraError::Transport {
            operation: "frame receive",
            message: "data socket is not bound".to_string(),
        })?;

        let expected = dest.len() + HEADER_LEN;
        self.recv_buf.resize(expected, 0);
        let count = socket
            .recv(&mut self.recv_buf)
            .map_err(|e| UltraError::Transport {
                operation: "frame receive",
                message: e.to_string(),
            })?;
        if count < expected {
            return Err(UltraError::Transport {
                operation: "frame receive",
                message: format!("short datagram: {count} of {expected} bytes"),
            });
        }

        let frame_number = u32::from_be_bytes([
            self.recv_buf[0],
            self.recv_buf[1],
            self.recv_buf[2],
            self.recv_buf[3],
        ]);
        // Bytes 4-5 carry the frame-type tag, unused by current firmware.
        trace!(frame_number, "frame received");

        self.sequence.validate(frame_number)?;
        dest.copy_from_slice(&self.recv_buf[HEADER_LEN..expected]);
        Ok(frame_number)
    }
}

impl Default for DataChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_exempt_then_contiguous() {
        let mut seq = FrameSequence::new();
        // Arbitrary starting number is fine for the first frame.
        assert!(seq.validate(17).is_ok());
        assert!(seq.validate(18).is_ok());
        assert!(seq.validate(19).is_ok());
    }

    #[test]
    fn gap_reported_exactly_once() {
        let mut seq = FrameSequence::new();
        assert!(seq.validate(1).is_ok());
        assert!(seq.validate(2).is_ok());
        assert!(seq.validate(3).is_ok());
        match seq.validate(5) {
            Err(UltraError::Sequence { expected, received }) => {
                assert_eq!(expected, 4);
                assert_eq!(received, 5);
            }
            other => panic!("expected sequence error, got {other:?}"),
        }
        // Tracker advanced to 5; the stream is contiguous again from 6.
        assert!(seq.validate(6).is_ok());
    }

    #[test]
    fn reset_restores_exemption() {
        let mut seq = FrameSequence::new();
        assert!(seq.validate(1).is_ok());
        seq.reset();
        assert!(seq.validate(100).is_ok());
        assert!(seq.validate(101).is_ok());
    }

    #[test]
    fn rebind_is_noop() {
        let mut channel = DataChannel::new();
        channel.bind("127.0.0.1", 0).unwrap();
        let addr = channel.local_addr().unwrap();
        channel.bind("127.0.0.1", 0).unwrap();
        assert_eq!(channel.local_addr().unwrap(), addr);
    }

    #[test]
    fn receive_requires_bind() {
        let mut channel = DataChannel::new();
        let mut dest = [0u8; 8];
        assert!(channel.receive_frame(&mut dest).is_err());
    }

    #[test]
    fn payload_copied_and_number_returned() {
        let mut channel = DataChannel::new();
        channel.bind("127.0.0.1", 0).unwrap();
        let addr = channel.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut datagram = vec![0u8, 0, 0, 42, 0, 0];
        datagram.extend_from_slice(&[0xAB; 8]);
        sender.send_to(&datagram, addr).unwrap();

        let mut dest = [0u8; 8];
        let frame_number = channel.receive_frame(&mut dest).unwrap();
        assert_eq!(frame_number, 42);
        assert_eq!(dest, [0xAB; 8]);
    }
}
