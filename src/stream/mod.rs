//! Stream handles: open/start/stop/close lifecycle plus the callback and
//! blocking I/O modes
//!
//! A [`Stream`] owns its engine stream exclusively and enforces the
//! `Open -> {Started <-> Stopped} -> Closed` state machine. Exactly one
//! mode holds per stream: callback mode installs the marshaling adapter
//! from [`bridge`], blocking mode installs the ring pump from the blocking
//! plumbing and exposes synchronous [`Stream::read`] / [`Stream::write`].

pub mod bridge;
mod blocking;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::constants::{DEFAULT_FRAMES_PER_BUFFER, RING_PERIODS};
use crate::engine::{
    DirectionParams, Engine, EngineStream, HostExtension, StreamInfo, StreamSpec,
};
use crate::error::{Error, ErrorCode, Result};
use crate::format::{buffer_len, frames_in_buffer, SampleFormat};
use crate::stream::blocking::BlockingIo;
use crate::stream::bridge::{BridgeShared, CallbackResult, StreamCallback};

// How long the blocking path sleeps between ring polls
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// How a stream exchanges samples with its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Synchronous read/write on the owning thread
    Blocking,
    /// A registered callback runs on the engine's real-time thread
    Callback,
}

/// Everything needed to open a stream. Construct with the defaults and
/// override what the stream needs:
///
/// ```ignore
/// let options = StreamOptions {
///     sample_rate: 44_100,
///     channels: 2,
///     format: SampleFormat::Int16,
///     output: true,
///     ..StreamOptions::default()
/// };
/// ```
pub struct StreamOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub input: bool,
    pub output: bool,
    /// Flat device index; `None` selects the engine's default device
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    /// Frames per period; 0 lets the engine choose
    pub frames_per_buffer: u32,
    pub input_host_extension: Option<HostExtension>,
    pub output_host_extension: Option<HostExtension>,
    /// Registering a callback selects [`StreamMode::Callback`]
    pub callback: Option<Box<StreamCallback>>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            format: SampleFormat::Float32,
            input: false,
            output: false,
            input_device: None,
            output_device: None,
            frames_per_buffer: 0,
            input_host_extension: None,
            output_host_extension: None,
            callback: None,
        }
    }
}

impl StreamOptions {
    /// Attach a stream callback, switching the stream to callback mode
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(
                Option<&[u8]>,
                usize,
                &crate::engine::StreamTimeInfo,
                crate::format::StatusFlags,
            ) -> CallbackResult
            + Send
            + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// One open audio stream
pub struct Stream {
    engine_stream: Box<dyn EngineStream>,
    info: StreamInfo,
    mode: StreamMode,
    input_params: Option<DirectionParams>,
    output_params: Option<DirectionParams>,
    open: bool,
    bridge: Option<Arc<BridgeShared>>,
    blocking: Option<BlockingIo>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("info", &self.info)
            .field("mode", &self.mode)
            .field("input_params", &self.input_params)
            .field("output_params", &self.output_params)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn open(engine: Arc<dyn Engine>, options: StreamOptions) -> Result<Self> {
        let StreamOptions {
            sample_rate,
            channels,
            format,
            input,
            output,
            input_device,
            output_device,
            frames_per_buffer,
            input_host_extension,
            output_host_extension,
            callback,
        } = options;

        // Argument validation happens before the engine is touched
        if !input && !output {
            return Err(Error::InvalidArgument(
                "must specify either input or output".into(),
            ));
        }
        if channels < 1 {
            return Err(Error::InvalidArgument("invalid audio channels".into()));
        }

        let devices = engine.devices()?;
        let resolve = |requested: Option<usize>,
                       default: Option<usize>,
                       direction: &str|
         -> Result<usize> {
            let index = match requested {
                Some(index) => index,
                None => default.ok_or_else(|| {
                    Error::engine(
                        ErrorCode::DeviceUnavailable,
                        format!("no default {} device", direction),
                    )
                })?,
            };
            if !devices.iter().any(|d| d.index == index) {
                return Err(Error::engine(
                    ErrorCode::InvalidDevice,
                    format!("no device with index {}", index),
                ));
            }
            Ok(index)
        };

        let input_params = if input {
            let device = resolve(input_device, engine.default_input_device(), "input")?;
            let latency = devices
                .iter()
                .find(|d| d.index == device)
                .map(|d| d.default_low_input_latency)
                .unwrap_or(0.0);
            Some(DirectionParams {
                device,
                channels,
                format,
                suggested_latency: latency,
                host_extension: input_host_extension,
            })
        } else {
            None
        };
        let output_params = if output {
            let device = resolve(output_device, engine.default_output_device(), "output")?;
            let latency = devices
                .iter()
                .find(|d| d.index == device)
                .map(|d| d.default_low_output_latency)
                .unwrap_or(0.0);
            Some(DirectionParams {
                device,
                channels,
                format,
                suggested_latency: latency,
                host_extension: output_host_extension,
            })
        } else {
            None
        };

        let spec = StreamSpec {
            sample_rate,
            frames_per_buffer,
            input: input_params.clone(),
            output: output_params.clone(),
        };

        let (mode, bridge_shared, blocking_io, period_fn) = match callback {
            Some(callback) => {
                let shared = BridgeShared::new();
                let period_fn =
                    bridge::adapter(callback, spec.output_stride(), sample_rate, shared.clone());
                (StreamMode::Callback, Some(shared), None, period_fn)
            }
            None => {
                let period_frames = if frames_per_buffer == 0 {
                    DEFAULT_FRAMES_PER_BUFFER
                } else {
                    frames_per_buffer
                };
                let (io, pump) = BlockingIo::new(&spec, period_frames, RING_PERIODS);
                (StreamMode::Blocking, None, Some(io), pump)
            }
        };

        // On failure everything built so far is dropped here; no
        // partially-open state survives.
        let (engine_stream, info) = engine.open_stream(&spec, period_fn)?;
        tracing::debug!(
            "opened {:?} stream: rate={} channels={} format={}",
            mode,
            sample_rate,
            channels,
            format.name()
        );

        Ok(Self {
            engine_stream,
            info,
            mode,
            input_params,
            output_params,
            open: true,
            bridge: bridge_shared,
            blocking: blocking_io,
        })
    }

    /// Begin audio processing
    pub fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.poll_faults()?;
        match self.engine_stream.start() {
            Ok(()) => Ok(()),
            // Starting a started stream is success
            Err(err) if err.engine_code() == Some(ErrorCode::StreamIsNotStopped) => Ok(()),
            Err(err) => {
                self.force_close();
                Err(err)
            }
        }
    }

    /// Stop after pending buffers have played
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.poll_faults()?;
        match self.engine_stream.stop() {
            Ok(()) => Ok(()),
            // Stopping a stopped stream is success
            Err(err) if err.engine_code() == Some(ErrorCode::StreamIsStopped) => Ok(()),
            Err(err) => {
                self.force_close();
                Err(err)
            }
        }
    }

    /// Stop immediately, discarding pending buffers
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.poll_faults()?;
        match self.engine_stream.abort() {
            Ok(()) => Ok(()),
            Err(err) if err.engine_code() == Some(ErrorCode::StreamIsStopped) => Ok(()),
            Err(err) => {
                self.force_close();
                Err(err)
            }
        }
    }

    /// Release the engine stream. Safe to call repeatedly; the first call
    /// releases, later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.open {
            self.force_close();
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Started and still delivering periods
    pub fn is_active(&self) -> Result<bool> {
        self.ensure_open()?;
        self.poll_faults()?;
        self.engine_stream.is_active()
    }

    pub fn is_stopped(&self) -> Result<bool> {
        self.ensure_open()?;
        self.poll_faults()?;
        self.engine_stream.is_stopped()
    }

    /// Stream clock in seconds
    pub fn time(&self) -> Result<f64> {
        self.ensure_open()?;
        Ok(self.engine_stream.time())
    }

    /// Smoothed fraction of each buffer period spent in the stream
    /// callback; 0.0 for blocking streams
    pub fn cpu_load(&self) -> Result<f64> {
        self.ensure_open()?;
        Ok(self
            .bridge
            .as_ref()
            .map(|bridge| bridge.cpu_load())
            .unwrap_or(0.0))
    }

    // Latency snapshot getters stay readable after close

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    pub fn input_latency(&self) -> f64 {
        self.info.input_latency
    }

    pub fn output_latency(&self) -> f64 {
        self.info.output_latency
    }

    pub fn sample_rate(&self) -> f64 {
        self.info.sample_rate
    }

    /// Failure recorded by the callback adapter, if any. Also surfaced by
    /// the next lifecycle or I/O call.
    pub fn take_callback_error(&self) -> Option<Error> {
        self.bridge.as_ref().and_then(|bridge| bridge.take_error())
    }

    /// Synchronously read `frames` frames of captured input. Blocks until
    /// the frames arrive. An input overflow since the last read is
    /// swallowed unless `raise_on_overflow` is set, in which case the
    /// stream is closed and the condition reported.
    pub fn read(&mut self, frames: i64, raise_on_overflow: bool) -> Result<Bytes> {
        if frames < 0 {
            return Err(Error::InvalidArgument("invalid number of frames".into()));
        }
        self.ensure_open()?;
        self.poll_faults()?;
        if self.mode == StreamMode::Callback {
            return Err(Error::engine(
                ErrorCode::CanNotReadFromACallbackStream,
                ErrorCode::CanNotReadFromACallbackStream.text(),
            ));
        }
        let params = self.input_params.as_ref().ok_or_else(|| {
            Error::engine(
                ErrorCode::CanNotReadFromAnOutputOnlyStream,
                ErrorCode::CanNotReadFromAnOutputOnlyStream.text(),
            )
        })?;
        let len = buffer_len(frames, params.channels, params.format)?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = match self.blocking.as_mut() {
                Some(io) => io.read_bytes(&mut buf[filled..]),
                None => 0,
            };
            filled += n;
            if filled >= len {
                break;
            }
            if n == 0 {
                self.wait_for_ring()?;
            }
        }

        let overflowed = self
            .blocking
            .as_ref()
            .map(BlockingIo::take_input_overflow)
            .unwrap_or(false);
        if overflowed && raise_on_overflow {
            self.force_close();
            return Err(Error::engine(
                ErrorCode::InputOverflowed,
                ErrorCode::InputOverflowed.text(),
            ));
        }
        Ok(buf.freeze())
    }

    /// Synchronously queue `frames` frames from `data` for playback.
    /// Blocks while the ring is full. A source buffer shorter than
    /// `frames` frames, or an engine-side underflow since the last write,
    /// is an underflow condition: swallowed unless `raise_on_underflow`
    /// is set, in which case the stream is closed and the condition
    /// reported.
    pub fn write(&mut self, data: &[u8], frames: i64, raise_on_underflow: bool) -> Result<()> {
        if frames < 0 {
            return Err(Error::InvalidArgument("invalid number of frames".into()));
        }
        self.ensure_open()?;
        self.poll_faults()?;
        if self.mode == StreamMode::Callback {
            return Err(Error::engine(
                ErrorCode::CanNotWriteToACallbackStream,
                ErrorCode::CanNotWriteToACallbackStream.text(),
            ));
        }
        let params = self.output_params.as_ref().ok_or_else(|| {
            Error::engine(
                ErrorCode::CanNotWriteToAnInputOnlyStream,
                ErrorCode::CanNotWriteToAnInputOnlyStream.text(),
            )
        })?;
        let required = buffer_len(frames, params.channels, params.format)?;
        let supplied = required.min(data.len());
        let short_buffer = supplied < required;

        let mut written = 0;
        while written < supplied {
            let n = match self.blocking.as_mut() {
                Some(io) => io.write_bytes(&data[written..supplied]),
                None => 0,
            };
            written += n;
            if written >= supplied {
                break;
            }
            if n == 0 {
                self.wait_for_ring()?;
            }
        }

        let ran_dry = self
            .blocking
            .as_ref()
            .map(BlockingIo::take_output_underflow)
            .unwrap_or(false);
        if (short_buffer || ran_dry) && raise_on_underflow {
            self.force_close();
            return Err(Error::engine(
                ErrorCode::OutputUnderflowed,
                ErrorCode::OutputUnderflowed.text(),
            ));
        }
        Ok(())
    }

    /// Frames of captured input ready for [`Stream::read`]
    pub fn read_available(&self) -> Result<i64> {
        self.ensure_open()?;
        self.poll_faults()?;
        if self.mode == StreamMode::Callback {
            return Err(Error::engine(
                ErrorCode::CanNotReadFromACallbackStream,
                ErrorCode::CanNotReadFromACallbackStream.text(),
            ));
        }
        let params = self.input_params.as_ref().ok_or_else(|| {
            Error::engine(
                ErrorCode::CanNotReadFromAnOutputOnlyStream,
                ErrorCode::CanNotReadFromAnOutputOnlyStream.text(),
            )
        })?;
        let bytes = self
            .blocking
            .as_ref()
            .map(BlockingIo::read_available_bytes)
            .unwrap_or(0);
        frames_in_buffer(bytes, params.channels, params.format)
    }

    /// Frames [`Stream::write`] can queue without blocking
    pub fn write_available(&self) -> Result<i64> {
        self.ensure_open()?;
        self.poll_faults()?;
        if self.mode == StreamMode::Callback {
            return Err(Error::engine(
                ErrorCode::CanNotWriteToACallbackStream,
                ErrorCode::CanNotWriteToACallbackStream.text(),
            ));
        }
        let params = self.output_params.as_ref().ok_or_else(|| {
            Error::engine(
                ErrorCode::CanNotWriteToAnInputOnlyStream,
                ErrorCode::CanNotWriteToAnInputOnlyStream.text(),
            )
        })?;
        let bytes = self
            .blocking
            .as_ref()
            .map(BlockingIo::write_available_bytes)
            .unwrap_or(0);
        frames_in_buffer(bytes, params.channels, params.format)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::stream_closed())
        }
    }

    /// Surface the first failure recorded against the owning thread since
    /// the last poll: callback failures first, then asynchronous engine
    /// errors
    fn poll_faults(&self) -> Result<()> {
        if let Some(bridge) = &self.bridge {
            if let Some(err) = bridge.take_error() {
                return Err(err);
            }
        }
        if let Some(err) = self.engine_stream.pending_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Wait for the pump to move data, failing if the stream can no
    /// longer make progress
    fn wait_for_ring(&mut self) -> Result<()> {
        if let Err(err) = self.poll_faults() {
            self.force_close();
            return Err(err);
        }
        match self.engine_stream.is_active() {
            Ok(true) => {
                thread::sleep(POLL_INTERVAL);
                Ok(())
            }
            Ok(false) => {
                self.force_close();
                Err(Error::engine(
                    ErrorCode::StreamIsStopped,
                    ErrorCode::StreamIsStopped.text(),
                ))
            }
            Err(err) => {
                self.force_close();
                Err(err)
            }
        }
    }

    /// Release engine resources. Delivery stops before the rings and
    /// adapter context go away.
    fn force_close(&mut self) {
        if let Err(err) = self.engine_stream.close() {
            tracing::warn!("engine stream close failed: {}", err);
        }
        self.blocking = None;
        self.open = false;
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.open {
            self.force_close();
        }
    }
}
