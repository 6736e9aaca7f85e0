//! Audio system lifecycle and device/host enumeration
//!
//! An [`AudioSystem`] stands for one initialization of the underlying
//! engine. Every device query and stream open goes through a live system;
//! terminating and re-initializing is legal and starts enumeration fresh.

use std::sync::Arc;

use crate::engine::{
    CpalEngine, DeviceInfo, DirectionParams, Engine, HostApiInfo, StreamSpec,
};
use crate::error::{Error, ErrorCode, Result};
use crate::format::SampleFormat;
use crate::stream::{Stream, StreamOptions};

/// One direction of a format support query
#[derive(Debug, Clone, Copy)]
pub struct FormatQuery {
    pub device: usize,
    pub channels: u16,
    pub format: SampleFormat,
}

/// Handle to an initialized audio engine
pub struct AudioSystem {
    engine: Arc<dyn Engine>,
}

impl AudioSystem {
    /// Initialize the default engine. Must precede any device or stream
    /// operation; call [`AudioSystem::terminate`] after all streams are
    /// closed.
    pub fn initialize() -> Result<Self> {
        let engine = CpalEngine::new()?;
        tracing::debug!("audio system initialized on engine '{}'", engine.name());
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Run on a caller-supplied engine instead of the default one. Used
    /// for alternate backends and for tests.
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Tear down the system. Streams opened from it must already be
    /// closed. A new system may be initialized afterwards.
    pub fn terminate(self) {
        drop(self);
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn device_count(&self) -> Result<usize> {
        Ok(self.engine.devices()?.len())
    }

    pub fn device_info(&self, index: usize) -> Result<DeviceInfo> {
        self.engine
            .devices()?
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| {
                Error::engine(
                    ErrorCode::InvalidDevice,
                    format!("no device with index {}", index),
                )
            })
    }

    pub fn host_api_count(&self) -> Result<usize> {
        Ok(self.engine.host_apis()?.len())
    }

    pub fn host_api_info(&self, index: usize) -> Result<HostApiInfo> {
        self.engine
            .host_apis()?
            .into_iter()
            .find(|h| h.index == index)
            .ok_or_else(|| {
                Error::engine(
                    ErrorCode::InvalidHostApi,
                    format!("no host API with index {}", index),
                )
            })
    }

    pub fn default_host_api(&self) -> Result<HostApiInfo> {
        self.host_api_info(self.engine.default_host_api())
    }

    pub fn default_input_device(&self) -> Result<DeviceInfo> {
        let index = self.engine.default_input_device().ok_or_else(|| {
            Error::engine(ErrorCode::DeviceUnavailable, "no default input device")
        })?;
        self.device_info(index)
    }

    pub fn default_output_device(&self) -> Result<DeviceInfo> {
        let index = self.engine.default_output_device().ok_or_else(|| {
            Error::engine(ErrorCode::DeviceUnavailable, "no default output device")
        })?;
        self.device_info(index)
    }

    /// Check whether the engine could open a stream with the given shape,
    /// without opening one
    pub fn is_format_supported(
        &self,
        sample_rate: u32,
        input: Option<FormatQuery>,
        output: Option<FormatQuery>,
    ) -> Result<()> {
        if input.is_none() && output.is_none() {
            return Err(Error::InvalidArgument(
                "must specify either input or output".into(),
            ));
        }
        let spec = StreamSpec {
            sample_rate,
            frames_per_buffer: 0,
            input: input.map(|q| direction_query(&q)),
            output: output.map(|q| direction_query(&q)),
        };
        self.engine.is_format_supported(&spec)
    }

    /// Open a stream. See [`StreamOptions`] for the request shape.
    pub fn open(&self, options: StreamOptions) -> Result<Stream> {
        Stream::open(self.engine.clone(), options)
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        tracing::debug!("audio system terminated");
    }
}

fn direction_query(query: &FormatQuery) -> DirectionParams {
    DirectionParams {
        device: query.device,
        channels: query.channels,
        format: query.format,
        suggested_latency: 0.0,
        host_extension: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    fn system() -> (MockEngine, AudioSystem) {
        let mock = MockEngine::with_default_devices();
        let system = AudioSystem::with_engine(Arc::new(mock.clone()));
        (mock, system)
    }

    #[test]
    fn enumeration_passes_through() {
        let (_, system) = system();
        assert_eq!(system.device_count().unwrap(), 3);
        assert_eq!(system.host_api_count().unwrap(), 1);

        let info = system.device_info(0).unwrap();
        assert_eq!(info.name, "Mock Microphone");
        assert_eq!(info.max_input_channels, 2);
        assert_eq!(info.max_output_channels, 0);

        let host = system.host_api_info(0).unwrap();
        assert_eq!(host.device_count, 3);
        assert_eq!(host.default_output_device, Some(1));
    }

    #[test]
    fn out_of_range_indices_are_invalid() {
        let (_, system) = system();
        let err = system.device_info(9).unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::InvalidDevice));
        let err = system.host_api_info(3).unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::InvalidHostApi));
    }

    #[test]
    fn default_devices_resolve() {
        let (_, system) = system();
        assert_eq!(system.default_input_device().unwrap().index, 0);
        assert_eq!(system.default_output_device().unwrap().index, 1);
        assert_eq!(system.default_host_api().unwrap().index, 0);
    }

    #[test]
    fn missing_defaults_are_unavailable() {
        let mock = MockEngine::without_defaults();
        let system = AudioSystem::with_engine(Arc::new(mock));
        let err = system.default_input_device().unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::DeviceUnavailable));
    }

    #[test]
    fn format_support_checks_channel_counts() {
        let (_, system) = system();
        // The mono microphone cannot open two channels
        let query = FormatQuery {
            device: 2,
            channels: 2,
            format: SampleFormat::Int16,
        };
        let err = system
            .is_format_supported(44_100, Some(query), None)
            .unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::InvalidChannelCount));

        let query = FormatQuery {
            device: 2,
            channels: 1,
            format: SampleFormat::Int16,
        };
        assert!(system.is_format_supported(44_100, Some(query), None).is_ok());
    }

    #[test]
    fn format_support_requires_a_direction() {
        let (_, system) = system();
        assert!(matches!(
            system.is_format_supported(44_100, None, None),
            Err(Error::InvalidArgument(_))
        ));
    }
}
