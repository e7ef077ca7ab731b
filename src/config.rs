//! Driver configuration.
//!
//! Addressing for the two network links plus the handful of static detector
//! parameters. Defaults match the factory wiring of the detector head on a
//! private point-to-point segment.
//!
//! # Example
//!
//! ```toml
//! headname = "192.168.1.100"
//! hostname = "192.168.1.103"
//! tcp_port = 7
//! udp_port = 5005
//! npixels = 512
//! resequence_on_start = false
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, UltraError};

/// Configuration for an Ultra detector connection.
#[derive(Debug, Clone, Deserialize)]
pub struct UltraConfig {
    /// Address of the detector head (command endpoint).
    #[serde(default = "default_headname")]
    pub headname: String,

    /// Local address the frame data socket binds to.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// TCP port of the detector's command endpoint.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Local UDP port frames are streamed to.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Pixels per frame (the detector is a 1-D strip).
    #[serde(default = "default_npixels")]
    pub npixels: usize,

    /// Grant a fresh first-frame exemption to the sequence tracker at the
    /// start of every acquisition run. Off by default: a tracker carried
    /// across runs also catches frames lost between runs.
    #[serde(default)]
    pub resequence_on_start: bool,
}

fn default_headname() -> String {
    "192.168.1.100".to_string()
}

fn default_hostname() -> String {
    "192.168.1.103".to_string()
}

fn default_tcp_port() -> u16 {
    7
}

fn default_udp_port() -> u16 {
    5005
}

fn default_npixels() -> usize {
    512
}

impl Default for UltraConfig {
    fn default() -> Self {
        Self {
            headname: default_headname(),
            hostname: default_hostname(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            npixels: default_npixels(),
            resequence_on_start: false,
        }
    }
}

impl UltraConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text).map_err(|e| UltraError::InvalidConfig {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what parsing enforces.
    pub fn validate(&self) -> Result<()> {
        if self.npixels == 0 {
            return Err(UltraError::InvalidConfig {
                message: "npixels must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_factory_wiring() {
        let config = UltraConfig::default();
        assert_eq!(config.headname, "192.168.1.100");
        assert_eq!(config.hostname, "192.168.1.103");
        assert_eq!(config.tcp_port, 7);
        assert_eq!(config.udp_port, 5005);
        assert_eq!(config.npixels, 512);
        assert!(!config.resequence_on_start);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: UltraConfig = toml::from_str("headname = \"10.0.0.5\"\n").unwrap();
        assert_eq!(config.headname, "10.0.0.5");
        assert_eq!(config.udp_port, 5005);
        assert_eq!(config.npixels, 512);
    }

    #[test]
    fn zero_pixels_rejected() {
        let config: UltraConfig = toml::from_str("npixels = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
