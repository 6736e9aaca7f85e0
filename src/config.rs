//! Stream default configuration
//!
//! Optional TOML file seeding default open parameters, looked up in the
//! platform config directory. Absent file or keys fall back to the
//! built-in defaults.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::format::SampleFormat;
use crate::stream::StreamOptions;

/// Defaults applied when opening streams
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// One of `float32`, `int32`, `int24`, `int16`, `int8`, `uint8`
    pub sample_format: String,
    /// 0 lets the engine choose
    pub frames_per_buffer: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            sample_format: SampleFormat::Float32.name().to_string(),
            frames_per_buffer: 0,
        }
    }
}

impl BridgeConfig {
    /// Load from the platform config directory, falling back to defaults
    /// when no file exists
    pub fn load() -> Result<Self> {
        let Some(dirs) = directories::ProjectDirs::from("", "", "audio-io-bridge") else {
            return Ok(Self::default());
        };
        let path = dirs.config_dir().join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn format(&self) -> Result<SampleFormat> {
        match self.sample_format.as_str() {
            "float32" => Ok(SampleFormat::Float32),
            "int32" => Ok(SampleFormat::Int32),
            "int24" => Ok(SampleFormat::Int24),
            "int16" => Ok(SampleFormat::Int16),
            "int8" => Ok(SampleFormat::Int8),
            "uint8" => Ok(SampleFormat::UInt8),
            other => Err(Error::Config(format!("unknown sample format: {}", other))),
        }
    }

    /// Stream options seeded from this configuration; direction and
    /// callback are still the caller's to set
    pub fn stream_options(&self) -> Result<StreamOptions> {
        Ok(StreamOptions {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format()?,
            frames_per_buffer: self.frames_per_buffer,
            ..StreamOptions::default()
        })
    }
}
