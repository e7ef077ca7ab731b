//! Register tables for the detector head.
//!
//! The control firmware exposes a small set of named FPGA registers plus a
//! family of analog readings and DAC voltages. Boolean switches are bit
//! fields within the FPGA registers; rather than one accessor pair per
//! field, everything is table-driven: a [`RegisterField`] names the
//! register and the mask, and the camera's generic `field`/`set_field`
//! operations do the read-modify-write.

use crate::camera::HeadType;
use crate::error::{Result, UltraError};

/// ADC channels per detector head.
pub const MAX_ADC_CHANNELS: usize = 16;

/// Raw 32-bit FPGA registers, read and written as hex over the command
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpgaRegister {
    /// X-chip control register.
    Xchip,
    /// Power control register.
    Power,
    /// Sync control register.
    Sync,
    /// ADC control register.
    Adc,
}

impl FpgaRegister {
    /// Command-channel name of the register.
    pub fn name(self) -> &'static str {
        match self {
            FpgaRegister::Xchip => "fpgaxchip",
            FpgaRegister::Power => "fpgapwr",
            FpgaRegister::Sync => "fpgasync",
            FpgaRegister::Adc => "fpgaadc",
        }
    }
}

/// One boolean bit field within an FPGA register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    /// Register holding the bit(s).
    pub register: FpgaRegister,
    /// Mask selecting the field.
    pub mask: u32,
    /// Whether the field accepts writes. Status bits are read-only.
    pub writable: bool,
}

/// TEC (Peltier cooler) power enable.
pub const TEC_POWER: RegisterField = RegisterField {
    register: FpgaRegister::Power,
    mask: 0x01,
    writable: true,
};

/// Detector head power enable.
pub const HEAD_POWER: RegisterField = RegisterField {
    register: FpgaRegister::Power,
    mask: 0x02,
    writable: true,
};

/// Sensor bias enable.
pub const BIAS_ENABLE: RegisterField = RegisterField {
    register: FpgaRegister::Power,
    mask: 0x04,
    writable: true,
};

/// TEC over-temperature status flag.
pub const TEC_OVER_TEMP: RegisterField = RegisterField {
    register: FpgaRegister::Power,
    mask: 0x8000_0000,
    writable: false,
};

/// External sync enable.
pub const SYNC_ENABLE: RegisterField = RegisterField {
    register: FpgaRegister::Sync,
    mask: 0x8000_0000,
    writable: true,
};

/// Calibration pulse enable.
pub const CALIB_ENABLE: RegisterField = RegisterField {
    register: FpgaRegister::Xchip,
    mask: 0x01,
    writable: true,
};

/// 8-per-column readout enable.
pub const EN_8PC: RegisterField = RegisterField {
    register: FpgaRegister::Xchip,
    mask: 0x06,
    writable: true,
};

/// Analog readings and DAC voltages addressed by command-channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    HeadColdTemp,
    HeadHotTemp,
    TecColdTemp,
    TecSupplyVolts,
    AdcPosSupplyVolts,
    AdcNegSupplyVolts,
    VinPosSupplyVolts,
    VinNegSupplyVolts,
    HeadAdcVdd,
    HeadVdd,
    HeadVref,
    HeadVrefc,
    HeadVpupref,
    HeadVclamp,
    HeadVres1,
    HeadVres2,
    HeadVtrip,
}

impl AnalogChannel {
    /// Command-channel name of the channel.
    pub fn name(self) -> &'static str {
        match self {
            AnalogChannel::HeadColdTemp => "coldtemp",
            AnalogChannel::HeadHotTemp => "hottemp",
            AnalogChannel::TecColdTemp => "tectemp",
            AnalogChannel::TecSupplyVolts => "tecsup",
            AnalogChannel::AdcPosSupplyVolts => "psupvadc",
            AnalogChannel::AdcNegSupplyVolts => "psunvadc",
            AnalogChannel::VinPosSupplyVolts => "psupvin",
            AnalogChannel::VinNegSupplyVolts => "psunvin",
            AnalogChannel::HeadAdcVdd => "headvccadc",
            AnalogChannel::HeadVdd => "headvcc",
            AnalogChannel::HeadVref => "headvref",
            AnalogChannel::HeadVrefc => "headvrefc",
            AnalogChannel::HeadVpupref => "headvpupref",
            AnalogChannel::HeadVclamp => "headvclamp",
            AnalogChannel::HeadVres1 => "headvres1",
            AnalogChannel::HeadVres2 => "headvres2",
            AnalogChannel::HeadVtrip => "headtrip",
        }
    }

    /// Whether the channel is a settable DAC voltage. Temperatures and
    /// supply monitors are read-only.
    pub fn writable(self) -> bool {
        matches!(
            self,
            AnalogChannel::HeadVdd
                | AnalogChannel::HeadVref
                | AnalogChannel::HeadVrefc
                | AnalogChannel::HeadVpupref
                | AnalogChannel::HeadVclamp
                | AnalogChannel::HeadVres1
                | AnalogChannel::HeadVres2
                | AnalogChannel::HeadVtrip
        )
    }
}

/// Auxiliary timing output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxLine {
    Aux1,
    Aux2,
}

impl AuxLine {
    /// Command-channel name of the delay/width register pair.
    pub fn name(self) -> &'static str {
        match self {
            AuxLine::Aux1 => "fpgaaux1",
            AuxLine::Aux2 => "fpgaaux2",
        }
    }
}

/// Map a logical ADC channel to its `(board, channel)` wiring.
///
/// Silicon and InGaAs heads route channels through a fixed permutation
/// across four ADC boards; the MCT head is wired sequentially.
pub fn adc_channel_lookup(head: HeadType, channel: usize) -> Result<(usize, usize)> {
    const SI_BOARD: [usize; MAX_ADC_CHANNELS] = [1, 0, 1, 0, 1, 0, 1, 0, 2, 3, 2, 3, 2, 3, 2, 3];
    const SI_CHANNEL: [usize; MAX_ADC_CHANNELS] = [3, 2, 0, 1, 1, 0, 2, 3, 3, 2, 0, 1, 1, 0, 2, 3];

    if channel >= MAX_ADC_CHANNELS {
        return Err(UltraError::InvalidChannel {
            channel,
            max: MAX_ADC_CHANNELS,
        });
    }
    let wiring = match head {
        HeadType::Mct => (channel / 4, channel % 4),
        HeadType::Silicon | HeadType::InGaAs => (SI_BOARD[channel], SI_CHANNEL[channel]),
    };
    Ok(wiring)
}
