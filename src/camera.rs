//! Camera facade.
//!
//! [`Camera`] ties the pieces together: it owns the command channel for
//! configuration traffic, hands the data channel and frame sink to the
//! acquisition controller, and exposes the detector's register surface as
//! typed operations. Configuration calls are synchronous on the caller's
//! thread; frame traffic never touches the command link.

use tracing::{debug, info};

use crate::acquisition::{AcquisitionController, AcquisitionPlan, FrameSink};
use crate::command::CommandChannel;
use crate::config::UltraConfig;
use crate::data::DataChannel;
use crate::error::{Result, UltraError};
use crate::protocol;
use crate::registers::{
    adc_channel_lookup, AnalogChannel, AuxLine, FpgaRegister, RegisterField,
};

/// Trigger source for an acquisition run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Internal trigger, free running.
    IntTrig,
    /// Internal trigger, one frame per software start.
    IntTrigMult,
    /// External trigger, single frame.
    ExtTrigSingle,
    /// External trigger, one frame per pulse.
    ExtTrigMult,
    /// External gate.
    ExtGate,
    /// External start/stop.
    ExtStartStop,
    /// External trigger with readout.
    ExtTrigReadout,
}

impl TriggerMode {
    /// Whether the detector can run in this mode.
    pub fn supported(self) -> bool {
        matches!(
            self,
            TriggerMode::IntTrig | TriggerMode::IntTrigMult | TriggerMode::ExtTrigMult
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMode::IntTrig => "IntTrig",
            TriggerMode::IntTrigMult => "IntTrigMult",
            TriggerMode::ExtTrigSingle => "ExtTrigSingle",
            TriggerMode::ExtTrigMult => "ExtTrigMult",
            TriggerMode::ExtGate => "ExtGate",
            TriggerMode::ExtStartStop => "ExtStartStop",
            TriggerMode::ExtTrigReadout => "ExtTrigReadout",
        }
    }
}

/// Pixel format of acquired frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Bpp8,
    Bpp16,
    Bpp32,
}

impl ImageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Bpp8 => "Bpp8",
            ImageType::Bpp16 => "Bpp16",
            ImageType::Bpp32 => "Bpp32",
        }
    }
}

/// Detector head variant, read from the identification register at init.
/// The variant decides ADC channel wiring and the X-chip timing roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadType {
    Silicon,
    InGaAs,
    Mct,
}

impl HeadType {
    /// Decode the identification register value.
    pub fn from_register(value: u32) -> Self {
        match value {
            0 => HeadType::Silicon,
            1 => HeadType::InGaAs,
            _ => HeadType::Mct,
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            HeadType::Silicon => "Silicon",
            HeadType::InGaAs => "INGAAS",
            HeadType::Mct => "MCT",
        }
    }
}

/// X-chip readout timing, expressed in the user-facing delay/width terms.
///
/// The detector stores timing as five raw delay/width register pairs whose
/// roles depend on the head variant; this struct is the composed view.
/// `shift_delay` is derived from the other fields by the timing rules: it
/// is populated on read and ignored on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XchipTiming {
    pub delay: u32,
    pub width: u32,
    pub zero_width: u32,
    pub sample_width: u32,
    pub reset_width: u32,
    pub settling_time: u32,
    pub xclk_half_period: u32,
    pub readout_mode: u32,
    pub shift_delay: u32,
}

/// Identification register holding the head variant.
const HEAD_TYPE_REGISTER: &str = "eeprom 0x1ff";

/// Exposure timer resolution: a 32-bit counter of 20 ns ticks.
const EXPOSURE_TICK_SECONDS: f64 = 20e-9;

/// Driver facade for one Ultra detector.
pub struct Camera {
    command: CommandChannel,
    controller: AcquisitionController,
    config: UltraConfig,
    data_addr: std::net::SocketAddr,
    head_type: HeadType,
    trigger_mode: TriggerMode,
    image_type: ImageType,
    nb_frames: i32,
    exp_time: f64,
}

impl Camera {
    /// Bind the data port, connect the command link, probe it and read the
    /// head variant, then spawn the acquisition worker.
    pub fn new(config: UltraConfig, sink: Box<dyn FrameSink>) -> Result<Self> {
        config.validate()?;

        let mut data = DataChannel::new();
        data.bind(&config.hostname, config.udp_port)?;
        let data_addr = data.local_addr()?;

        let command = CommandChannel::new();
        let head_type = init_link(&command, &config)?;
        info!(
            head = head_type.model_name(),
            npixels = config.npixels,
            "detector initialised"
        );

        let controller = AcquisitionController::new(data, sink)?;

        Ok(Self {
            command,
            controller,
            config,
            data_addr,
            head_type,
            trigger_mode: TriggerMode::IntTrig,
            image_type: ImageType::Bpp16,
            nb_frames: 0,
            exp_time: 0.0,
        })
    }

    /// Drop and re-establish the command link, re-probing the detector.
    /// The data socket stays bound.
    pub fn reset(&mut self) -> Result<()> {
        self.command.disconnect();
        self.head_type = init_link(&self.command, &self.config)?;
        Ok(())
    }

    /// Local address frames are streamed to. The detector must be told to
    /// send its data here.
    pub fn data_addr(&self) -> std::net::SocketAddr {
        self.data_addr
    }

    // -- acquisition control

    /// Nothing to stage between configuration and start; present for
    /// interface parity with start/stop.
    pub fn prepare_acq(&self) {}

    /// Start an acquisition run using the current configuration snapshot.
    ///
    /// The frame payload size is fixed here; only 16-bit frames are
    /// supported and any other configured format fails before any network
    /// I/O. For `ExtTrigMult` the call blocks until the worker is running.
    pub fn start_acq(&self) -> Result<()> {
        let payload_bytes = match self.image_type {
            ImageType::Bpp16 => self.config.npixels * 2,
            other => {
                return Err(UltraError::UnsupportedFormat {
                    image_type: other.as_str(),
                })
            }
        };

        let plan = AcquisitionPlan {
            frame_count: self.nb_frames as usize,
            trigger_mode: self.trigger_mode,
            payload_bytes,
            resequence: self.config.resequence_on_start,
        };
        self.controller.start(plan)
    }

    /// Stop the current run and surface the fault that ended it, if the
    /// run died on an error rather than completing.
    pub fn stop_acq(&self) -> Result<()> {
        self.controller.stop();
        match self.controller.take_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Frames delivered so far in the current (or last) run.
    pub fn acquired_frames(&self) -> usize {
        self.controller.frames_acquired()
    }

    /// Whether the acquisition loop is executing.
    pub fn is_acq_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Take the error that ended the last run without stopping anything.
    pub fn take_acquisition_fault(&self) -> Option<UltraError> {
        self.controller.take_fault()
    }

    // -- detector metadata

    pub fn detector_type(&self) -> &'static str {
        "ultra"
    }

    pub fn detector_model(&self) -> &'static str {
        self.head_type.model_name()
    }

    pub fn head_type(&self) -> HeadType {
        self.head_type
    }

    /// Image dimensions in pixels; the detector is a 1-D strip.
    pub fn detector_image_size(&self) -> (usize, usize) {
        (self.config.npixels, 1)
    }

    /// Pixel pitch in micrometres.
    pub fn pixel_size(&self) -> (f64, f64) {
        (1.0, 1.0)
    }

    // -- synchronisation configuration

    /// Set the trigger mode. Unsupported modes are rejected before any
    /// state mutation; the previously configured mode stays in force.
    pub fn set_trig_mode(&mut self, mode: TriggerMode) -> Result<()> {
        if !mode.supported() {
            return Err(UltraError::UnsupportedTriggerMode {
                mode: mode.as_str(),
            });
        }
        debug!(mode = mode.as_str(), "trigger mode set");
        self.trigger_mode = mode;
        Ok(())
    }

    pub fn trig_mode(&self) -> TriggerMode {
        self.trigger_mode
    }

    pub fn set_image_type(&mut self, image_type: ImageType) {
        self.image_type = image_type;
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn set_exp_time(&mut self, exp_time: f64) {
        self.exp_time = exp_time;
    }

    pub fn exp_time(&self) -> f64 {
        self.exp_time
    }

    /// Valid exposure time range in seconds.
    pub fn exposure_time_range(&self) -> (f64, f64) {
        (0.0, f64::from(u32::MAX) * EXPOSURE_TICK_SECONDS)
    }

    /// The detector has no inter-frame latency control; only zero is
    /// accepted.
    pub fn set_lat_time(&mut self, lat_time: f64) -> Result<()> {
        if lat_time != 0.0 {
            return Err(UltraError::InvalidConfig {
                message: "latency not managed".to_string(),
            });
        }
        Ok(())
    }

    pub fn lat_time(&self) -> f64 {
        0.0
    }

    pub fn lat_time_range(&self) -> (f64, f64) {
        (0.0, f64::from(u32::MAX) * EXPOSURE_TICK_SECONDS)
    }

    /// Set the frame target for the next run; 0 means run until stopped.
    pub fn set_nb_frames(&mut self, nb_frames: i32) -> Result<()> {
        if nb_frames < 0 {
            return Err(UltraError::InvalidConfig {
                message: format!("frame count must be >= 0, got {nb_frames}"),
            });
        }
        self.nb_frames = nb_frames;
        Ok(())
    }

    pub fn nb_frames(&self) -> i32 {
        self.nb_frames
    }

    // -- register surface

    /// Read a raw FPGA register.
    pub fn read_register(&self, register: FpgaRegister) -> Result<u32> {
        self.read_u32(register.name())
    }

    /// Write a raw FPGA register.
    pub fn write_register(&self, register: FpgaRegister, value: u32) -> Result<()> {
        self.set_value(&format!("{} {:x}", register.name(), value))
    }

    /// Read one boolean bit field.
    pub fn field(&self, field: RegisterField) -> Result<bool> {
        Ok(self.read_register(field.register)? & field.mask != 0)
    }

    /// Read-modify-write one boolean bit field. Every write is committed,
    /// including clearing bits.
    pub fn set_field(&self, field: RegisterField, enabled: bool) -> Result<()> {
        if !field.writable {
            return Err(UltraError::InvalidConfig {
                message: format!("field {:#x} of {} is read-only", field.mask, field.register.name()),
            });
        }
        let current = self.read_register(field.register)?;
        let updated = if enabled {
            current | field.mask
        } else {
            current & !field.mask
        };
        self.write_register(field.register, updated)
    }

    /// Frames the detector has sent since power-up.
    pub fn frame_count(&self) -> Result<u32> {
        self.read_u32("fpgaframe")
    }

    /// Frames the detector failed to send.
    pub fn frame_error_count(&self) -> Result<u32> {
        self.read_u32("fpgaerror")
    }

    /// Read an analog channel (temperature, supply or DAC voltage).
    pub fn read_voltage(&self, channel: AnalogChannel) -> Result<f32> {
        self.read_f32(channel.name())
    }

    /// Set a DAC voltage channel.
    pub fn set_voltage(&self, channel: AnalogChannel, volts: f32) -> Result<()> {
        if !channel.writable() {
            return Err(UltraError::InvalidConfig {
                message: format!("analog channel {} is read-only", channel.name()),
            });
        }
        self.set_value(&format!("{} {}V", channel.name(), volts))
    }

    /// Read the offset trim of one ADC channel.
    pub fn adc_offset(&self, channel: usize) -> Result<f32> {
        let (board, chan) = adc_channel_lookup(self.head_type, channel)?;
        self.read_f32(&format!("adc{board}off{chan}"))
    }

    /// Set the offset trim of one ADC channel.
    pub fn set_adc_offset(&self, channel: usize, volts: f32) -> Result<()> {
        let (board, chan) = adc_channel_lookup(self.head_type, channel)?;
        self.set_value(&format!("adc{board}off{chan} {volts}V"))
    }

    /// Read the gain reference of one ADC channel.
    pub fn adc_gain(&self, channel: usize) -> Result<f32> {
        let (board, chan) = adc_channel_lookup(self.head_type, channel)?;
        self.read_f32(&format!("adc{board}ref{chan}"))
    }

    /// Set the gain reference of one ADC channel.
    pub fn set_adc_gain(&self, channel: usize, volts: f32) -> Result<()> {
        let (board, chan) = adc_channel_lookup(self.head_type, channel)?;
        self.set_value(&format!("adc{board}ref{chan} {volts}V"))
    }

    /// Read an auxiliary output's delay/width pair.
    pub fn aux(&self, line: AuxLine) -> Result<(u32, u32)> {
        self.read_pair(line.name())
    }

    /// Set an auxiliary output's delay/width pair.
    pub fn set_aux(&self, line: AuxLine, delay: u32, width: u32) -> Result<()> {
        self.set_value(&format!("{} {delay} {width}", line.name()))
    }

    /// Read and compose the X-chip readout timing.
    ///
    /// The S1/S2 sampling roles are swapped between InGaAs and the other
    /// head variants; the composed view hides the swap.
    pub fn xchip_timing(&self) -> Result<XchipTiming> {
        let (raw_delay, reset_width) = self.read_pair("fpgarst")?;
        let (s1_delay, s1_width) = self.read_pair("fpgas1")?;
        let (s2_delay, s2_width) = self.read_pair("fpgas2")?;
        let (xclk_half_period, settling_time) = self.read_pair("fpgaxclk")?;
        let (shift_delay, _shift_width) = self.read_pair("fpgashift")?;

        let timing = if self.head_type == HeadType::InGaAs {
            XchipTiming {
                zero_width: s2_width,
                delay: raw_delay.wrapping_add(s2_width),
                sample_width: s1_width,
                width: (s1_width.wrapping_add(s1_delay))
                    .wrapping_sub(s2_width.wrapping_add(s2_delay)),
                reset_width,
                settling_time,
                xclk_half_period,
                readout_mode: 0,
                shift_delay,
            }
        } else {
            let delay = raw_delay.wrapping_add(s1_width);
            let width = (s2_width.wrapping_add(s2_delay))
                .wrapping_sub(s1_width.wrapping_add(s1_delay));
            XchipTiming {
                zero_width: s1_width,
                delay,
                sample_width: s2_width,
                width,
                reset_width,
                settling_time,
                xclk_half_period,
                readout_mode: u32::from(shift_delay == delay.wrapping_add(width)),
                shift_delay,
            }
        };
        Ok(timing)
    }

    /// Decompose and write the X-chip readout timing.
    pub fn set_xchip_timing(&self, timing: XchipTiming) -> Result<()> {
        let delay = if timing.delay > timing.zero_width {
            timing.delay - timing.zero_width
        } else {
            1
        };

        let start_delay = delay
            .wrapping_add(timing.zero_width)
            .wrapping_add(timing.width)
            .wrapping_sub(timing.sample_width);
        let shift_delay = if timing.readout_mode == 1 {
            start_delay.wrapping_add(timing.sample_width)
        } else {
            delay
        };

        let (s1_delay, s1_width, s2_delay, s2_width) = if self.head_type == HeadType::InGaAs {
            (start_delay, timing.sample_width, delay, timing.zero_width)
        } else {
            (delay, timing.zero_width, start_delay, timing.sample_width)
        };

        self.set_value(&format!("fpgarst {delay} {}", timing.reset_width))?;
        self.set_value(&format!("fpgas1 {s1_delay} {s1_width}"))?;
        self.set_value(&format!("fpgas2 {s2_delay} {s2_width}"))?;
        self.set_value(&format!("fpgashift {shift_delay} 1"))?;
        if timing.settling_time > timing.xclk_half_period.wrapping_sub(2) {
            let settling_time = timing.xclk_half_period.wrapping_sub(2);
            self.set_value(&format!(
                "fpgaxclk {} {settling_time}",
                timing.xclk_half_period
            ))?;
        }
        Ok(())
    }

    /// Persist the current register state in the detector.
    pub fn save_configuration(&self) -> Result<()> {
        self.set_value("state")
    }

    /// Reload the persisted register state.
    pub fn restore_configuration(&self) -> Result<()> {
        self.set_value("state")
    }

    // -- command-channel value plumbing

    fn read_u32(&self, name: &str) -> Result<u32> {
        let command = protocol::format_read(name);
        let reply = self.command.send_wait(&command)?;
        protocol::parse_u32_hex(&command, &reply)
    }

    fn read_f32(&self, name: &str) -> Result<f32> {
        let command = protocol::format_read(name);
        let reply = self.command.send_wait(&command)?;
        protocol::parse_f32(&command, &reply)
    }

    fn read_pair(&self, name: &str) -> Result<(u32, u32)> {
        let command = protocol::format_read(name);
        let reply = self.command.send_wait(&command)?;
        protocol::parse_pair(&command, &reply)
    }

    fn set_value(&self, args: &str) -> Result<()> {
        let command = protocol::format_set(args);
        let reply = self.command.send_wait(&command)?;
        protocol::expect_ack(&command, &reply)
    }
}

/// Connect, probe and identify the head over the command link.
fn init_link(command: &CommandChannel, config: &UltraConfig) -> Result<HeadType> {
    command.connect(&config.headname, config.tcp_port)?;

    // The empty probe command only verifies the link is live; the firmware
    // answers it with its fixed rejection line.
    let reply = command.send_wait("")?;
    if reply != protocol::NOT_RECOGNISED {
        return Err(UltraError::Protocol {
            command: String::new(),
            reply,
        });
    }

    let read_command = protocol::format_read(HEAD_TYPE_REGISTER);
    let reply = command.send_wait(&read_command)?;
    let value = protocol::parse_u32_hex(&read_command, &reply)?;
    Ok(HeadType::from_register(value))
}
