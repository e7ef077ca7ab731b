//! Network driver for the Ultra spectroscopy detector.
//!
//! The detector is a 512-pixel strip sensor driven over two network links:
//! a persistent TCP connection carrying line-oriented text commands
//! (`read <name>` / `set <name> <value>`), and a UDP stream delivering one
//! frame per datagram with a 6-byte sequence header. This crate implements
//! the transport and control core plus the register surface on top of it.
//!
//! # Architecture
//!
//! - [`CommandChannel`] - synchronous request/response command link
//! - [`DataChannel`] - frame datagram receiver with loss detection
//! - [`AcquisitionController`] - dedicated worker thread running the
//!   start/stop state machine; pulls frames into buffers obtained from a
//!   caller-supplied [`FrameSink`]
//! - [`Camera`] - facade wiring the channels together and exposing the
//!   detector's registers as typed operations
//!
//! Exactly two threads are involved: the caller's thread for configuration
//! and the worker for frame pulls. Command and data traffic use separate
//! links and are never interleaved.
//!
//! # Example
//!
//! ```no_run
//! use daq_driver_ultra::{Camera, FrameInfo, FrameSink, UltraConfig};
//!
//! struct VecSink {
//!     frames: Vec<Vec<u8>>,
//!     scratch: Vec<u8>,
//! }
//!
//! impl FrameSink for VecSink {
//!     fn acquisition_started(&mut self) {}
//!     fn frame_buffer(&mut self, _frame_index: usize) -> &mut [u8] {
//!         &mut self.scratch
//!     }
//!     fn frame_ready(&mut self, _info: FrameInfo) -> bool {
//!         self.frames.push(self.scratch.clone());
//!         true
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let sink = VecSink { frames: Vec::new(), scratch: vec![0; 1024] };
//! let mut camera = Camera::new(UltraConfig::default(), Box::new(sink))?;
//! camera.set_nb_frames(100)?;
//! camera.start_acq()?;
//! while camera.is_acq_running() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! camera.stop_acq()?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod camera;
pub mod command;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod registers;

pub use acquisition::{AcquisitionController, AcquisitionPlan, FrameInfo, FrameSink};
pub use camera::{Camera, HeadType, ImageType, TriggerMode, XchipTiming};
pub use command::CommandChannel;
pub use config::UltraConfig;
pub use data::{DataChannel, FrameSequence};
pub use error::{Result, UltraError};
pub use registers::{
    AnalogChannel, AuxLine, FpgaRegister, RegisterField, BIAS_ENABLE, CALIB_ENABLE, EN_8PC,
    HEAD_POWER, MAX_ADC_CHANNELS, SYNC_ENABLE, TEC_OVER_TEMP, TEC_POWER,
};
