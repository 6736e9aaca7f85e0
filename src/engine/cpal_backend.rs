//! cpal-backed audio engine
//!
//! Maps the engine abstraction onto cpal hosts, devices and raw byte
//! streams. Full-duplex streams are assembled from an input and an output
//! cpal stream with an SPSC ring carrying captured bytes to the period
//! function, which runs on the output stream's thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::HeapRb;

use super::{
    DeviceInfo, DirectionParams, Engine, EnginePeriod, EngineStream, HostApiInfo, HostApiTypeId,
    PeriodFn, StreamInfo, StreamSpec, StreamTimeInfo,
};
use crate::constants::DEFAULT_FRAMES_PER_BUFFER;
use crate::error::{Error, ErrorCode, Result};
use crate::format::{Continuation, SampleFormat, StatusFlags};

// Latency figures reported when cpal does not expose buffer limits
const FALLBACK_LOW_LATENCY: f64 = 0.01;
const FALLBACK_HIGH_LATENCY: f64 = 0.1;

// finished-state values shared with the real-time closures
const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const ABORTED: u8 = 2;

/// Engine implementation on top of cpal
pub struct CpalEngine {
    hosts: Vec<cpal::Host>,
    default_host_index: usize,
}

impl CpalEngine {
    pub fn new() -> Result<Self> {
        let default_id = cpal::default_host().id();
        let mut hosts = Vec::new();
        let mut default_host_index = 0;
        for id in cpal::available_hosts() {
            match cpal::host_from_id(id) {
                Ok(host) => {
                    if id == default_id {
                        default_host_index = hosts.len();
                    }
                    hosts.push(host);
                }
                Err(e) => {
                    tracing::warn!("host API {} unavailable: {}", id.name(), e);
                }
            }
        }
        if hosts.is_empty() {
            return Err(Error::engine(
                ErrorCode::HostApiNotFound,
                "no audio host APIs available",
            ));
        }
        Ok(Self {
            hosts,
            default_host_index,
        })
    }

    /// Resolve a flat device index to its cpal device
    fn device_at(&self, index: usize) -> Result<cpal::Device> {
        let mut seen = 0;
        for host in &self.hosts {
            if let Ok(devices) = host.devices() {
                for device in devices {
                    if seen == index {
                        return Ok(device);
                    }
                    seen += 1;
                }
            }
        }
        Err(Error::engine(
            ErrorCode::InvalidDevice,
            format!("no device with index {}", index),
        ))
    }

    /// Flat index of a named device within one host's section of the table
    fn flat_index_of(&self, host_index: usize, name: &str) -> Option<usize> {
        let mut seen = 0;
        for (i, host) in self.hosts.iter().enumerate() {
            let devices = host.devices().ok()?;
            for device in devices {
                if i == host_index {
                    if device.name().ok().as_deref() == Some(name) {
                        return Some(seen);
                    }
                }
                seen += 1;
            }
        }
        None
    }

    fn default_device_index(&self, input: bool) -> Option<usize> {
        let host = &self.hosts[self.default_host_index];
        let device = if input {
            host.default_input_device()?
        } else {
            host.default_output_device()?
        };
        let name = device.name().ok()?;
        self.flat_index_of(self.default_host_index, &name)
    }
}

impl Engine for CpalEngine {
    fn name(&self) -> &str {
        "cpal"
    }

    fn host_apis(&self) -> Result<Vec<HostApiInfo>> {
        let mut result = Vec::with_capacity(self.hosts.len());
        for (index, host) in self.hosts.iter().enumerate() {
            let device_count = host.devices().map(Iterator::count).unwrap_or(0);
            let default_input = host
                .default_input_device()
                .and_then(|d| d.name().ok())
                .and_then(|name| self.flat_index_of(index, &name));
            let default_output = host
                .default_output_device()
                .and_then(|d| d.name().ok())
                .and_then(|name| self.flat_index_of(index, &name));
            result.push(HostApiInfo {
                index,
                type_id: host_type_from_name(host.id().name()),
                name: host.id().name().to_string(),
                device_count,
                default_input_device: default_input,
                default_output_device: default_output,
            });
        }
        Ok(result)
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut result = Vec::new();
        for (host_api, host) in self.hosts.iter().enumerate() {
            let devices = host
                .devices()
                .map_err(|e| Error::engine(ErrorCode::UnanticipatedHostError, e.to_string()))?;
            for device in devices {
                let index = result.len();
                result.push(probe_device(&device, index, host_api));
            }
        }
        Ok(result)
    }

    fn default_input_device(&self) -> Option<usize> {
        self.default_device_index(true)
    }

    fn default_output_device(&self) -> Option<usize> {
        self.default_device_index(false)
    }

    fn default_host_api(&self) -> usize {
        self.default_host_index
    }

    fn is_format_supported(&self, spec: &StreamSpec) -> Result<()> {
        if let Some(params) = &spec.input {
            let device = self.device_at(params.device)?;
            check_direction(&device, params, spec.sample_rate, true)?;
        }
        if let Some(params) = &spec.output {
            let device = self.device_at(params.device)?;
            check_direction(&device, params, spec.sample_rate, false)?;
        }
        Ok(())
    }

    fn open_stream(
        &self,
        spec: &StreamSpec,
        mut period_fn: PeriodFn,
    ) -> Result<(Box<dyn EngineStream>, StreamInfo)> {
        let clock = Arc::new(StreamClock::new());
        let finished = Arc::new(AtomicU8::new(RUNNING));
        let (err_tx, err_rx) = bounded::<Error>(16);

        let frames_per_buffer = if spec.frames_per_buffer == 0 {
            DEFAULT_FRAMES_PER_BUFFER
        } else {
            spec.frames_per_buffer
        };
        let period_secs = frames_per_buffer as f64 / spec.sample_rate as f64;

        let mut input_stream = None;
        let mut output_stream = None;

        match (&spec.input, &spec.output) {
            (Some(input), None) => {
                let stride = input.channels as usize * input.format.width();
                let device = self.device_at(input.device)?;
                let config = stream_config(input, spec);
                let sample_format = cpal_format(input.format)?;
                let clock = clock.clone();
                let finished_rt = finished.clone();
                let stream = device
                    .build_input_stream_raw(
                        &config,
                        sample_format,
                        move |data: &cpal::Data, info: &cpal::InputCallbackInfo| {
                            if finished_rt.load(Ordering::Acquire) != RUNNING {
                                return;
                            }
                            let bytes = data.bytes();
                            let time = input_time_info(&clock, info);
                            let outcome = period_fn(EnginePeriod {
                                input: Some(bytes),
                                output: None,
                                frames: bytes.len() / stride,
                                time,
                                flags: StatusFlags::empty(),
                            });
                            note_outcome(&finished_rt, outcome);
                        },
                        err_fn(err_tx.clone()),
                        None,
                    )
                    .map_err(map_build_error)?;
                input_stream = Some(stream);
            }
            (None, Some(output)) => {
                let stride = output.channels as usize * output.format.width();
                let device = self.device_at(output.device)?;
                let config = stream_config(output, spec);
                let sample_format = cpal_format(output.format)?;
                let clock = clock.clone();
                let finished_rt = finished.clone();
                let stream = device
                    .build_output_stream_raw(
                        &config,
                        sample_format,
                        move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
                            let bytes = data.bytes_mut();
                            if finished_rt.load(Ordering::Acquire) != RUNNING {
                                bytes.fill(0);
                                return;
                            }
                            let time = output_time_info(&clock, info);
                            let frames = bytes.len() / stride;
                            let outcome = period_fn(EnginePeriod {
                                input: None,
                                output: Some(bytes),
                                frames,
                                time,
                                flags: StatusFlags::empty(),
                            });
                            note_outcome(&finished_rt, outcome);
                        },
                        err_fn(err_tx.clone()),
                        None,
                    )
                    .map_err(map_build_error)?;
                output_stream = Some(stream);
            }
            (Some(input), Some(output)) => {
                let in_stride = input.channels as usize * input.format.width();
                let out_stride = output.channels as usize * output.format.width();

                // Captured bytes cross to the output thread through an SPSC
                // ring sized for several periods of slack.
                let ring_capacity = in_stride * frames_per_buffer as usize * 8;
                let (mut capture_tx, mut capture_rx) = HeapRb::<u8>::new(ring_capacity).split();
                let overflowed = Arc::new(AtomicBool::new(false));

                let in_device = self.device_at(input.device)?;
                let in_config = stream_config(input, spec);
                let in_format = cpal_format(input.format)?;
                let finished_in = finished.clone();
                let overflow_in = overflowed.clone();
                let stream = in_device
                    .build_input_stream_raw(
                        &in_config,
                        in_format,
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            if finished_in.load(Ordering::Acquire) != RUNNING {
                                return;
                            }
                            let bytes = data.bytes();
                            if capture_tx.push_slice(bytes) < bytes.len() {
                                overflow_in.store(true, Ordering::Release);
                            }
                        },
                        err_fn(err_tx.clone()),
                        None,
                    )
                    .map_err(map_build_error)?;
                input_stream = Some(stream);

                let out_device = self.device_at(output.device)?;
                let out_config = stream_config(output, spec);
                let out_format = cpal_format(output.format)?;
                let clock = clock.clone();
                let finished_rt = finished.clone();
                let mut scratch: Vec<u8> = Vec::new();
                let stream = out_device
                    .build_output_stream_raw(
                        &out_config,
                        out_format,
                        move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
                            let bytes = data.bytes_mut();
                            if finished_rt.load(Ordering::Acquire) != RUNNING {
                                bytes.fill(0);
                                return;
                            }
                            let frames = bytes.len() / out_stride;
                            let mut flags = StatusFlags::empty();
                            if overflowed.swap(false, Ordering::AcqRel) {
                                flags |= StatusFlags::INPUT_OVERFLOW;
                            }
                            scratch.resize(frames * in_stride, 0);
                            let got = capture_rx.pop_slice(&mut scratch);
                            if got < scratch.len() {
                                scratch[got..].fill(0);
                                flags |= StatusFlags::INPUT_UNDERFLOW;
                            }
                            let time = output_time_info(&clock, info);
                            let outcome = period_fn(EnginePeriod {
                                input: Some(&scratch),
                                output: Some(bytes),
                                frames,
                                time,
                                flags,
                            });
                            note_outcome(&finished_rt, outcome);
                        },
                        err_fn(err_tx.clone()),
                        None,
                    )
                    .map_err(map_build_error)?;
                output_stream = Some(stream);
            }
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "must specify either input or output".into(),
                ));
            }
        }

        let info = StreamInfo {
            input_latency: spec
                .input
                .as_ref()
                .map(|p| p.suggested_latency + period_secs)
                .unwrap_or(0.0),
            output_latency: spec
                .output
                .as_ref()
                .map(|p| p.suggested_latency + period_secs)
                .unwrap_or(0.0),
            sample_rate: spec.sample_rate as f64,
        };

        let stream = CpalStream {
            input: input_stream,
            output: output_stream,
            started: false,
            closed: false,
            finished,
            clock,
            err_rx,
        };
        Ok((Box::new(stream), info))
    }
}

/// One open cpal stream pair
struct CpalStream {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    started: bool,
    closed: bool,
    finished: Arc<AtomicU8>,
    clock: Arc<StreamClock>,
    err_rx: Receiver<Error>,
}

impl EngineStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::stream_closed());
        }
        if self.started {
            return Err(Error::engine(
                ErrorCode::StreamIsNotStopped,
                ErrorCode::StreamIsNotStopped.text(),
            ));
        }
        if let Some(stream) = &self.input {
            stream.play().map_err(map_play_error)?;
        }
        if let Some(stream) = &self.output {
            stream.play().map_err(map_play_error)?;
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::stream_closed());
        }
        if !self.started {
            return Err(Error::engine(
                ErrorCode::StreamIsStopped,
                ErrorCode::StreamIsStopped.text(),
            ));
        }
        if let Some(stream) = &self.output {
            stream.pause().map_err(map_pause_error)?;
        }
        if let Some(stream) = &self.input {
            stream.pause().map_err(map_pause_error)?;
        }
        self.started = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        // cpal has no drain/discard distinction; abort is stop
        self.stop()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // Stop callback delivery before the period function is released:
        // dropping a cpal stream tears down its callback thread.
        if let Some(stream) = self.output.take() {
            let _ = stream.pause();
            drop(stream);
        }
        if let Some(stream) = self.input.take() {
            let _ = stream.pause();
            drop(stream);
        }
        self.started = false;
        self.closed = true;
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        Ok(self.started && !self.closed && self.finished.load(Ordering::Acquire) == RUNNING)
    }

    fn is_stopped(&self) -> Result<bool> {
        Ok(!self.started || self.closed)
    }

    fn time(&self) -> f64 {
        self.clock.now()
    }

    fn pending_error(&self) -> Option<Error> {
        self.err_rx.try_recv().ok()
    }
}

/// Monotonic per-stream clock, origin at open time
struct StreamClock {
    start: Instant,
}

impl StreamClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

fn note_outcome(finished: &AtomicU8, outcome: Continuation) {
    match outcome {
        Continuation::Continue => {}
        Continuation::Complete => finished.store(COMPLETED, Ordering::Release),
        Continuation::Abort => finished.store(ABORTED, Ordering::Release),
    }
}

fn err_fn(tx: Sender<Error>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::error!("cpal stream error: {}", err);
        let code = match err {
            cpal::StreamError::DeviceNotAvailable => ErrorCode::DeviceUnavailable,
            _ => ErrorCode::UnanticipatedHostError,
        };
        let _ = tx.try_send(Error::engine(code, err.to_string()));
    }
}

fn input_time_info(clock: &StreamClock, info: &cpal::InputCallbackInfo) -> StreamTimeInfo {
    let current = clock.now();
    let ts = info.timestamp();
    let capture_lead = ts
        .callback
        .duration_since(&ts.capture)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    StreamTimeInfo {
        input_buffer_adc_time: current - capture_lead,
        current_time: current,
        output_buffer_dac_time: 0.0,
    }
}

fn output_time_info(clock: &StreamClock, info: &cpal::OutputCallbackInfo) -> StreamTimeInfo {
    let current = clock.now();
    let ts = info.timestamp();
    let playback_lag = ts
        .playback
        .duration_since(&ts.callback)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    StreamTimeInfo {
        input_buffer_adc_time: 0.0,
        current_time: current,
        output_buffer_dac_time: current + playback_lag,
    }
}

fn stream_config(params: &DirectionParams, spec: &StreamSpec) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: match spec.frames_per_buffer {
            0 => cpal::BufferSize::Default,
            n => cpal::BufferSize::Fixed(n),
        },
    }
}

fn cpal_format(format: SampleFormat) -> Result<cpal::SampleFormat> {
    match format {
        SampleFormat::Float32 => Ok(cpal::SampleFormat::F32),
        SampleFormat::Int32 => Ok(cpal::SampleFormat::I32),
        SampleFormat::Int16 => Ok(cpal::SampleFormat::I16),
        SampleFormat::Int8 => Ok(cpal::SampleFormat::I8),
        SampleFormat::UInt8 => Ok(cpal::SampleFormat::U8),
        SampleFormat::Int24 => Err(Error::engine(
            ErrorCode::SampleFormatNotSupported,
            "packed 24-bit samples are not supported by this engine",
        )),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> Error {
    let code = match err {
        cpal::BuildStreamError::DeviceNotAvailable => ErrorCode::DeviceUnavailable,
        cpal::BuildStreamError::StreamConfigNotSupported => ErrorCode::SampleFormatNotSupported,
        cpal::BuildStreamError::InvalidArgument => ErrorCode::InvalidFlag,
        _ => ErrorCode::UnanticipatedHostError,
    };
    Error::engine(code, err.to_string())
}

fn map_play_error(err: cpal::PlayStreamError) -> Error {
    let code = match err {
        cpal::PlayStreamError::DeviceNotAvailable => ErrorCode::DeviceUnavailable,
        _ => ErrorCode::UnanticipatedHostError,
    };
    Error::engine(code, err.to_string())
}

fn map_pause_error(err: cpal::PauseStreamError) -> Error {
    let code = match err {
        cpal::PauseStreamError::DeviceNotAvailable => ErrorCode::DeviceUnavailable,
        _ => ErrorCode::UnanticipatedHostError,
    };
    Error::engine(code, err.to_string())
}

fn host_type_from_name(name: &str) -> HostApiTypeId {
    match name.to_ascii_lowercase().as_str() {
        "alsa" => HostApiTypeId::Alsa,
        "jack" => HostApiTypeId::Jack,
        "coreaudio" => HostApiTypeId::CoreAudio,
        "wasapi" => HostApiTypeId::Wasapi,
        "asio" => HostApiTypeId::Asio,
        "oss" => HostApiTypeId::Oss,
        _ => HostApiTypeId::InDevelopment,
    }
}

fn probe_device(device: &cpal::Device, index: usize, host_api: usize) -> DeviceInfo {
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let max_input_channels = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);
    let max_output_channels = device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    let default_config = device
        .default_output_config()
        .or_else(|_| device.default_input_config())
        .ok();
    let default_sample_rate = default_config
        .as_ref()
        .map(|c| c.sample_rate().0 as f64)
        .unwrap_or(0.0);

    let (low, high) = default_config
        .as_ref()
        .map(|c| latency_bounds(c.buffer_size(), c.sample_rate().0))
        .unwrap_or((FALLBACK_LOW_LATENCY, FALLBACK_HIGH_LATENCY));

    DeviceInfo {
        index,
        name,
        host_api,
        max_input_channels,
        max_output_channels,
        default_sample_rate,
        default_low_input_latency: low,
        default_low_output_latency: low,
        default_high_input_latency: high,
        default_high_output_latency: high,
    }
}

fn latency_bounds(buffer_size: &cpal::SupportedBufferSize, sample_rate: u32) -> (f64, f64) {
    match buffer_size {
        cpal::SupportedBufferSize::Range { min, max } => {
            let rate = sample_rate.max(1) as f64;
            (*min as f64 / rate, *max as f64 / rate)
        }
        cpal::SupportedBufferSize::Unknown => (FALLBACK_LOW_LATENCY, FALLBACK_HIGH_LATENCY),
    }
}

fn check_direction(
    device: &cpal::Device,
    params: &DirectionParams,
    sample_rate: u32,
    input: bool,
) -> Result<()> {
    cpal_format(params.format)?;
    let configs: Vec<_> = if input {
        device
            .supported_input_configs()
            .map_err(|e| Error::engine(ErrorCode::UnanticipatedHostError, e.to_string()))?
            .collect()
    } else {
        device
            .supported_output_configs()
            .map_err(|e| Error::engine(ErrorCode::UnanticipatedHostError, e.to_string()))?
            .collect()
    };

    if !configs.iter().any(|c| c.channels() >= params.channels) {
        return Err(Error::engine(
            ErrorCode::InvalidChannelCount,
            ErrorCode::InvalidChannelCount.text(),
        ));
    }
    let rate = cpal::SampleRate(sample_rate);
    if !configs
        .iter()
        .any(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
    {
        return Err(Error::engine(
            ErrorCode::InvalidSampleRate,
            ErrorCode::InvalidSampleRate.text(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Enumeration should not panic even on machines with no audio devices
    // (CI). Opening streams is exercised against the mock engine instead.
    #[test]
    fn enumeration_is_well_formed() {
        let engine = match CpalEngine::new() {
            Ok(engine) => engine,
            // No host APIs at all is a legal outcome in a container
            Err(_) => return,
        };
        let hosts = engine.host_apis().unwrap();
        assert!(!hosts.is_empty());
        if let Ok(devices) = engine.devices() {
            for (i, device) in devices.iter().enumerate() {
                assert_eq!(device.index, i);
                assert!(device.host_api < hosts.len());
            }
        }
    }
}
