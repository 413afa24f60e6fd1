//! Pipeline settings, loadable from TOML.
//!
//! ```toml
//! [transport]
//! fec_window = 128
//!
//! [demux]
//! crc_policy = "reject"
//!
//! [buffering]
//! strategy = "tick-driven"
//! initial_delay_ms = 300
//! ```
//!
//! Every section and field is optional.

use crate::buffering::BufferingConfig;
use crate::demultiplex::DemuxConfig;
use crate::packet::Packet;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Number of RTP sequence numbers the FEC ingestor holds for reordering and recovery
    pub fec_window: usize,
    /// Receive buffer size for UDP datagrams
    pub max_datagram_size: usize,
    /// Read size for byte stream sources
    pub read_chunk_size: usize,
    /// Depth of the queues between pipeline stages
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            fec_window: 64,
            max_datagram_size: 2048,
            read_chunk_size: Packet::SIZE * 64,
            channel_capacity: 64,
        }
    }
}

impl TransportConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_datagram_size", self.max_datagram_size),
            ("read_chunk_size", self.read_chunk_size),
            ("channel_capacity", self.channel_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must not be zero", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    pub demux: DemuxConfig,
    pub buffering: BufferingConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        self.buffering.validate()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffering::WindowedOptions;
    use crate::psi::CrcPolicy;
    use assert_matches::assert_matches;

    #[test]
    fn empty_is_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.transport.read_chunk_size, 188 * 64);
        assert_eq!(config.demux.crc_policy, CrcPolicy::Warn);
        assert_eq!(config.buffering, BufferingConfig::PassThrough);
    }

    #[test]
    fn sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [transport]
            fec_window = 128

            [demux]
            crc_policy = "reject"

            [buffering]
            strategy = "windowed"
            video_interval_ms = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.fec_window, 128);
        assert_eq!(config.transport.channel_capacity, 64);
        assert_eq!(config.demux.crc_policy, CrcPolicy::Reject);
        assert_matches!(config.buffering, BufferingConfig::Windowed(WindowedOptions { video_interval_ms, audio_interval_ms }) => {
            assert_eq!(video_interval_ms, 40.0);
            assert!((audio_interval_ms - 21.333).abs() < 0.001);
        });
    }

    #[test]
    fn rejected() {
        assert_matches!(
            PipelineConfig::from_toml_str("[buffering]\nstrategy = \"bogus\""),
            Err(ConfigError::Toml(_))
        );
        assert_matches!(
            PipelineConfig::from_toml_str("[buffering]\nstrategy = \"tick-driven\"\ntick_hz = -1"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            PipelineConfig::from_toml_str("[transport]\nchannel_capacity = 0"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            PipelineConfig::load("/nonexistent/pipeline.toml"),
            Err(ConfigError::Io(_))
        );
    }
}
