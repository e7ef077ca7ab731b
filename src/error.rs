//! Error types for Ultra detector operations.
//!
//! All failure modes of the driver surface as [`UltraError`]. Socket setup,
//! transport and protocol failures are kept as distinct variants because the
//! caller's recovery differs: setup errors are permanent for the operation,
//! transport errors kill the in-flight exchange, protocol errors kill a
//! single request, and a sequence error invalidates the whole acquisition
//! run (the detector has no resynchronization protocol).

use thiserror::Error;

/// Result type alias for Ultra driver operations.
pub type Result<T> = std::result::Result<T, UltraError>;

/// Errors that can occur when driving an Ultra detector.
#[derive(Error, Debug)]
pub enum UltraError {
    /// A second connect attempt while the command link is live.
    #[error("Command channel is already connected")]
    AlreadyConnected,

    /// Operation that needs the command link issued while disconnected.
    #[error("Command channel is not connected")]
    NotConnected,

    /// Control endpoint could not be resolved or connected.
    #[error("Failed to connect to {addr}: {message}")]
    Connection { addr: String, message: String },

    /// Data socket could not be created or bound.
    #[error("Failed to bind data socket {addr}: {message}")]
    Bind { addr: String, message: String },

    /// Zero-length or failed read/write on an established link.
    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// Reply content the protocol does not allow for this request.
    #[error("Protocol error for command '{command}': unexpected reply {reply:?}")]
    Protocol { command: String, reply: String },

    /// Gap in the frame sequence numbers; the run is lost.
    #[error("Frame sequence error: expected frame {expected}, received {received}")]
    Sequence { expected: u32, received: u32 },

    /// Configured pixel format the readout path does not support.
    #[error("Unsupported image type {image_type}: only 16-bit frames are supported")]
    UnsupportedFormat { image_type: &'static str },

    /// Trigger mode the detector cannot run.
    #[error("Unsupported trigger mode {mode}")]
    UnsupportedTriggerMode { mode: &'static str },

    /// ADC channel index outside the detector's channel count.
    #[error("Invalid ADC channel {channel}: detector has {max} channels")]
    InvalidChannel { channel: usize, max: usize },

    /// Semantically invalid configuration or parameter value.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Start requested while a run is already in progress.
    #[error("Acquisition is already running")]
    Busy,

    /// Acquisition worker thread is gone (panicked or joined).
    #[error("Acquisition worker is not available")]
    WorkerGone,

    /// I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
