//! Audio engine abstraction
//!
//! The bridge talks to audio hardware through the [`Engine`] trait: host
//! API and device enumeration, plus opening period-callback streams. The
//! production implementation wraps cpal; tests use a scripted mock.
//!
//! Engines are always callback-driven. Both stream modes of the public API
//! install a period function here: callback mode installs the marshaling
//! adapter, blocking mode installs the ring-buffer pump.

pub mod cpal_backend;
#[cfg(test)]
pub(crate) mod mock;

pub use cpal_backend::CpalEngine;

use serde::Serialize;

use crate::error::Result;
use crate::format::{Continuation, SampleFormat, StatusFlags};

/// Host API families an engine may sit on. Values mirror the native
/// engine's host API type enum and are part of the stable external
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum HostApiTypeId {
    InDevelopment = 0,
    DirectSound = 1,
    Mme = 2,
    Asio = 3,
    SoundManager = 4,
    CoreAudio = 5,
    Oss = 7,
    Alsa = 8,
    Al = 9,
    BeOs = 10,
    WdmKs = 11,
    Jack = 12,
    Wasapi = 13,
    AudioScienceHpi = 14,
}

impl HostApiTypeId {
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// One entry of the engine's flat device table
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Index in the flat device table, stable for the life of the engine
    pub index: usize,
    pub name: String,
    /// Index into the host API table
    pub host_api: usize,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    /// Device-advertised target latencies in seconds, used to seed
    /// suggested latency when opening streams
    pub default_low_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_input_latency: f64,
    pub default_high_output_latency: f64,
}

/// One entry of the engine's host API table
#[derive(Debug, Clone, Serialize)]
pub struct HostApiInfo {
    pub index: usize,
    pub type_id: HostApiTypeId,
    pub name: String,
    pub device_count: usize,
    pub default_input_device: Option<usize>,
    pub default_output_device: Option<usize>,
}

/// Host-API-specific open hints, forwarded to the backend as-is. Backends
/// with no use for a hint ignore it.
#[derive(Debug, Clone, Default)]
pub struct HostExtension {
    /// Request exclusive-mode access where the host API distinguishes it
    pub exclusive: bool,
    /// Host channel map, where supported
    pub channel_map: Option<Vec<u32>>,
}

/// One direction of an open request, fully resolved against the device
/// table before the engine sees it
#[derive(Debug, Clone)]
pub struct DirectionParams {
    pub device: usize,
    pub channels: u16,
    pub format: SampleFormat,
    /// Seconds of buffering the caller is willing to tolerate
    pub suggested_latency: f64,
    pub host_extension: Option<HostExtension>,
}

/// A fully resolved open request
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub sample_rate: u32,
    /// Frames per period; 0 lets the engine choose
    pub frames_per_buffer: u32,
    pub input: Option<DirectionParams>,
    pub output: Option<DirectionParams>,
}

impl StreamSpec {
    /// Byte stride of one input frame, if the stream has input
    pub fn input_stride(&self) -> Option<usize> {
        let p = self.input.as_ref()?;
        Some(p.channels as usize * p.format.width())
    }

    /// Byte stride of one output frame, if the stream has output
    pub fn output_stride(&self) -> Option<usize> {
        let p = self.output.as_ref()?;
        Some(p.channels as usize * p.format.width())
    }
}

/// Timing for one callback period, in seconds of the stream clock
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamTimeInfo {
    /// When the first input sample of the period was captured
    pub input_buffer_adc_time: f64,
    /// When the callback was invoked
    pub current_time: f64,
    /// When the first output sample of the period will play
    pub output_buffer_dac_time: f64,
}

/// One real-time period handed to the bridge by the engine.
///
/// Invariant: span lengths equal `frames * channels * sample width` for
/// the respective direction.
pub struct EnginePeriod<'a> {
    pub input: Option<&'a [u8]>,
    pub output: Option<&'a mut [u8]>,
    pub frames: usize,
    pub time: StreamTimeInfo,
    pub flags: StatusFlags,
}

/// Invoked by the engine on its real-time thread, once per period.
/// Invocations are strictly sequential; the engine never overlaps them.
pub type PeriodFn = Box<dyn FnMut(EnginePeriod<'_>) -> Continuation + Send + 'static>;

/// Latency and sample-rate snapshot captured when a stream opens. Never
/// mutated afterwards; stale once the stream is closed and reopened.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamInfo {
    pub input_latency: f64,
    pub output_latency: f64,
    pub sample_rate: f64,
}

/// An open engine stream. Owned exclusively by one [`crate::stream::Stream`]
/// and released exactly once via [`EngineStream::close`].
pub trait EngineStream {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Stop without draining queued output
    fn abort(&mut self) -> Result<()>;
    /// Stop period delivery and release the native stream. After close
    /// returns, the period function will never be invoked again.
    fn close(&mut self) -> Result<()>;
    /// Started, and the callback has not yet completed or aborted
    fn is_active(&self) -> Result<bool>;
    fn is_stopped(&self) -> Result<bool>;
    /// Stream clock in seconds; valid while the stream is open
    fn time(&self) -> f64;
    /// Asynchronous engine failure, if one has been reported since the
    /// last poll
    fn pending_error(&self) -> Option<crate::error::Error> {
        None
    }
}

/// An audio engine: enumeration plus stream opening
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    fn host_apis(&self) -> Result<Vec<HostApiInfo>>;
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
    fn default_input_device(&self) -> Option<usize>;
    fn default_output_device(&self) -> Option<usize>;
    fn default_host_api(&self) -> usize {
        0
    }
    /// Pre-flight check that the engine can open `spec` without opening it
    fn is_format_supported(&self, spec: &StreamSpec) -> Result<()>;
    /// Open a stream and begin delivering periods to `period_fn` once
    /// started. Returns the stream and its latency snapshot.
    fn open_stream(
        &self,
        spec: &StreamSpec,
        period_fn: PeriodFn,
    ) -> Result<(Box<dyn EngineStream>, StreamInfo)>;
}
