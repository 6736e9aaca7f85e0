//! Scripted in-memory engine for tests
//!
//! Streams never touch hardware; tests drive the period function by hand
//! through the pump helpers and script failures per operation.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{
    DeviceInfo, Engine, EnginePeriod, EngineStream, HostApiInfo, HostApiTypeId, PeriodFn,
    StreamInfo, StreamSpec, StreamTimeInfo,
};
use crate::error::{Error, ErrorCode, Result};
use crate::format::{Continuation, StatusFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockOp {
    Start,
    Stop,
    Abort,
}

pub(crate) struct MockStreamState {
    spec: StreamSpec,
    period_fn: Option<PeriodFn>,
    started: bool,
    closed: bool,
    finished: Option<Continuation>,
    injected_error: Option<Error>,
    fail_next: Option<(MockOp, ErrorCode)>,
    opened_at: Instant,
}

struct MockInner {
    devices: Vec<DeviceInfo>,
    host_apis: Vec<HostApiInfo>,
    default_input: Option<usize>,
    default_output: Option<usize>,
    open_error: Mutex<Option<ErrorCode>>,
    active: Mutex<Option<Arc<Mutex<MockStreamState>>>>,
}

#[derive(Clone)]
pub(crate) struct MockEngine {
    inner: Arc<MockInner>,
}

fn mock_device(index: usize, name: &str, inputs: u16, outputs: u16) -> DeviceInfo {
    DeviceInfo {
        index,
        name: name.to_string(),
        host_api: 0,
        max_input_channels: inputs,
        max_output_channels: outputs,
        default_sample_rate: 48_000.0,
        default_low_input_latency: 0.005,
        default_low_output_latency: 0.005,
        default_high_input_latency: 0.05,
        default_high_output_latency: 0.05,
    }
}

impl MockEngine {
    /// Two-channel input and output devices plus a mono-only input device,
    /// with defaults assigned
    pub fn with_default_devices() -> Self {
        let devices = vec![
            mock_device(0, "Mock Microphone", 2, 0),
            mock_device(1, "Mock Speakers", 0, 2),
            mock_device(2, "Mock Mono Microphone", 1, 0),
        ];
        Self::new(devices, Some(0), Some(1))
    }

    /// Devices exist but no defaults are assigned
    pub fn without_defaults() -> Self {
        let devices = vec![
            mock_device(0, "Mock Microphone", 2, 0),
            mock_device(1, "Mock Speakers", 0, 2),
        ];
        Self::new(devices, None, None)
    }

    fn new(devices: Vec<DeviceInfo>, default_input: Option<usize>, default_output: Option<usize>) -> Self {
        let host_apis = vec![HostApiInfo {
            index: 0,
            type_id: HostApiTypeId::Alsa,
            name: "Mock Host".to_string(),
            device_count: devices.len(),
            default_input_device: default_input,
            default_output_device: default_output,
        }];
        Self {
            inner: Arc::new(MockInner {
                devices,
                host_apis,
                default_input,
                default_output,
                open_error: Mutex::new(None),
                active: Mutex::new(None),
            }),
        }
    }

    /// Make the next open fail with `code`
    pub fn fail_next_open(&self, code: ErrorCode) {
        *self.inner.open_error.lock() = Some(code);
    }

    /// Make the next `op` on the open stream fail with `code`
    pub fn fail_next(&self, op: MockOp, code: ErrorCode) {
        self.state().lock().fail_next = Some((op, code));
    }

    /// Report an asynchronous engine failure on the open stream
    pub fn inject_stream_error(&self, error: Error) {
        self.state().lock().injected_error = Some(error);
    }

    fn state(&self) -> Arc<Mutex<MockStreamState>> {
        self.inner
            .active
            .lock()
            .clone()
            .expect("no stream has been opened on the mock engine")
    }

    /// Run one output period of `frames` frames. Returns the bytes the
    /// period function produced and the continuation it handed back.
    pub fn pump_output(&self, frames: usize) -> (Vec<u8>, Continuation) {
        self.pump_output_flagged(frames, StatusFlags::empty())
    }

    pub fn pump_output_flagged(
        &self,
        frames: usize,
        flags: StatusFlags,
    ) -> (Vec<u8>, Continuation) {
        let state = self.state();
        let mut state = state.lock();
        assert!(state.started, "pumped a stream that is not started");
        let stride = state
            .spec
            .output_stride()
            .expect("pump_output on a stream without output");
        let mut buffer = vec![0u8; frames * stride];
        if let Some(outcome) = state.finished {
            return (buffer, outcome);
        }
        let time = mock_time(&state);
        let period_fn = state.period_fn.as_mut().expect("stream already closed");
        let outcome = period_fn(EnginePeriod {
            input: None,
            output: Some(&mut buffer),
            frames,
            time,
            flags,
        });
        if outcome != Continuation::Continue {
            state.finished = Some(outcome);
        }
        (buffer, outcome)
    }

    /// Run one input period carrying `bytes`
    pub fn pump_input(&self, bytes: &[u8], flags: StatusFlags) -> Continuation {
        let state = self.state();
        let mut state = state.lock();
        assert!(state.started, "pumped a stream that is not started");
        let stride = state
            .spec
            .input_stride()
            .expect("pump_input on a stream without input");
        if let Some(outcome) = state.finished {
            return outcome;
        }
        let time = mock_time(&state);
        let frames = bytes.len() / stride;
        let period_fn = state.period_fn.as_mut().expect("stream already closed");
        let outcome = period_fn(EnginePeriod {
            input: Some(bytes),
            output: None,
            frames,
            time,
            flags,
        });
        if outcome != Continuation::Continue {
            state.finished = Some(outcome);
        }
        outcome
    }
}

fn mock_time(state: &MockStreamState) -> StreamTimeInfo {
    let now = state.opened_at.elapsed().as_secs_f64();
    StreamTimeInfo {
        input_buffer_adc_time: now,
        current_time: now,
        output_buffer_dac_time: now,
    }
}

impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn host_apis(&self) -> Result<Vec<HostApiInfo>> {
        Ok(self.inner.host_apis.clone())
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.inner.devices.clone())
    }

    fn default_input_device(&self) -> Option<usize> {
        self.inner.default_input
    }

    fn default_output_device(&self) -> Option<usize> {
        self.inner.default_output
    }

    fn is_format_supported(&self, spec: &StreamSpec) -> Result<()> {
        self.check_spec(spec)
    }

    fn open_stream(
        &self,
        spec: &StreamSpec,
        period_fn: PeriodFn,
    ) -> Result<(Box<dyn EngineStream>, StreamInfo)> {
        if let Some(code) = self.inner.open_error.lock().take() {
            return Err(Error::engine(code, code.text()));
        }
        self.check_spec(spec)?;

        let state = Arc::new(Mutex::new(MockStreamState {
            spec: spec.clone(),
            period_fn: Some(period_fn),
            started: false,
            closed: false,
            finished: None,
            injected_error: None,
            fail_next: None,
            opened_at: Instant::now(),
        }));
        *self.inner.active.lock() = Some(state.clone());

        let info = StreamInfo {
            input_latency: spec.input.as_ref().map(|p| p.suggested_latency).unwrap_or(0.0),
            output_latency: spec.output.as_ref().map(|p| p.suggested_latency).unwrap_or(0.0),
            sample_rate: spec.sample_rate as f64,
        };
        Ok((Box::new(MockStream { state }), info))
    }
}

impl MockEngine {
    fn check_spec(&self, spec: &StreamSpec) -> Result<()> {
        if let Some(params) = &spec.input {
            let device = self
                .inner
                .devices
                .get(params.device)
                .ok_or_else(|| Error::engine(ErrorCode::InvalidDevice, ErrorCode::InvalidDevice.text()))?;
            if params.channels > device.max_input_channels {
                return Err(Error::engine(
                    ErrorCode::InvalidChannelCount,
                    ErrorCode::InvalidChannelCount.text(),
                ));
            }
        }
        if let Some(params) = &spec.output {
            let device = self
                .inner
                .devices
                .get(params.device)
                .ok_or_else(|| Error::engine(ErrorCode::InvalidDevice, ErrorCode::InvalidDevice.text()))?;
            if params.channels > device.max_output_channels {
                return Err(Error::engine(
                    ErrorCode::InvalidChannelCount,
                    ErrorCode::InvalidChannelCount.text(),
                ));
            }
        }
        Ok(())
    }
}

struct MockStream {
    state: Arc<Mutex<MockStreamState>>,
}

impl MockStream {
    fn take_failure(state: &mut MockStreamState, op: MockOp) -> Result<()> {
        if let Some((failing_op, code)) = state.fail_next {
            if failing_op == op {
                state.fail_next = None;
                return Err(Error::engine(code, code.text()));
            }
        }
        Ok(())
    }
}

impl EngineStream for MockStream {
    fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::stream_closed());
        }
        Self::take_failure(&mut state, MockOp::Start)?;
        if state.started {
            return Err(Error::engine(
                ErrorCode::StreamIsNotStopped,
                ErrorCode::StreamIsNotStopped.text(),
            ));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::stream_closed());
        }
        Self::take_failure(&mut state, MockOp::Stop)?;
        if !state.started {
            return Err(Error::engine(
                ErrorCode::StreamIsStopped,
                ErrorCode::StreamIsStopped.text(),
            ));
        }
        state.started = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::stream_closed());
        }
        Self::take_failure(&mut state, MockOp::Abort)?;
        if !state.started {
            return Err(Error::engine(
                ErrorCode::StreamIsStopped,
                ErrorCode::StreamIsStopped.text(),
            ));
        }
        state.started = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        // Delivery stops before the period function is released
        state.started = false;
        state.closed = true;
        state.period_fn = None;
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.started && !state.closed && state.finished.is_none())
    }

    fn is_stopped(&self) -> Result<bool> {
        let state = self.state.lock();
        Ok(!state.started || state.closed)
    }

    fn time(&self) -> f64 {
        self.state.lock().opened_at.elapsed().as_secs_f64()
    }

    fn pending_error(&self) -> Option<Error> {
        self.state.lock().injected_error.take()
    }
}
