//! Callback marshaling adapter
//!
//! Wraps a user stream callback into the engine's period function. Runs on
//! the engine's real-time thread, one invocation per buffer period, with
//! invocations strictly sequential. The adapter packages the period's
//! input bytes, frame count, timing and status flags for the callback,
//! copies the callback's output back into the engine buffer, and converts
//! callback misbehavior into an `Abort` handed to the engine plus an error
//! recorded for the owning thread. The real-time thread itself never
//! unwinds into the engine.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{EnginePeriod, PeriodFn, StreamTimeInfo};
use crate::error::Error;
use crate::format::{Continuation, StatusFlags};

/// What a stream callback hands back: output samples (ignored on streams
/// without an output direction) and a continuation code. Constructing one
/// is the only way to return from a callback, so malformed results cannot
/// exist.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub data: Bytes,
    pub action: Continuation,
}

impl CallbackResult {
    pub fn new(data: impl Into<Bytes>, action: Continuation) -> Self {
        Self {
            data: data.into(),
            action,
        }
    }

    /// Keep the stream running after this buffer
    pub fn continue_with(data: impl Into<Bytes>) -> Self {
        Self::new(data, Continuation::Continue)
    }

    /// Finish normally after this buffer
    pub fn complete_with(data: impl Into<Bytes>) -> Self {
        Self::new(data, Continuation::Complete)
    }

    /// Terminate immediately
    pub fn abort() -> Self {
        Self::new(Bytes::new(), Continuation::Abort)
    }
}

/// User stream callback: `(input, frames, time, flags) -> result`.
///
/// `input` is `Some` iff the stream has an input direction. Invoked on the
/// engine's real-time thread; it must not block on the owning thread.
pub type StreamCallback = dyn FnMut(Option<&[u8]>, usize, &StreamTimeInfo, StatusFlags) -> CallbackResult
    + Send
    + 'static;

// Weight of history in the CPU load average
const LOAD_SMOOTHING: f64 = 0.9;

/// State shared between the adapter on the real-time thread and the
/// owning thread's stream handle
pub(crate) struct BridgeShared {
    /// First unreported callback failure, observed by the owning thread
    /// on its next stream operation
    pending: Mutex<Option<Error>>,
    /// Smoothed fraction of the buffer period spent inside the callback,
    /// stored as f32 bits
    cpu_load: AtomicU32,
}

impl BridgeShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(None),
            cpu_load: AtomicU32::new(0f32.to_bits()),
        })
    }

    pub fn record_error(&self, error: Error) {
        let mut slot = self.pending.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn take_error(&self) -> Option<Error> {
        self.pending.lock().take()
    }

    pub fn cpu_load(&self) -> f64 {
        f32::from_bits(self.cpu_load.load(Ordering::Relaxed)) as f64
    }

    fn update_load(&self, load: f64) {
        let old = f32::from_bits(self.cpu_load.load(Ordering::Relaxed)) as f64;
        let new = old * LOAD_SMOOTHING + load * (1.0 - LOAD_SMOOTHING);
        self.cpu_load.store((new as f32).to_bits(), Ordering::Relaxed);
    }
}

/// Build the period function that marshals engine periods through `callback`
pub(crate) fn adapter(
    mut callback: Box<StreamCallback>,
    output_stride: Option<usize>,
    sample_rate: u32,
    shared: Arc<BridgeShared>,
) -> PeriodFn {
    Box::new(move |period: EnginePeriod<'_>| {
        let begin = Instant::now();
        let EnginePeriod {
            input,
            output,
            frames,
            time,
            flags,
        } = period;

        let result = catch_unwind(AssertUnwindSafe(|| callback(input, frames, &time, flags)));
        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!("stream callback panicked: {}", message);
                shared.record_error(Error::CallbackPanic(message));
                return Continuation::Abort;
            }
        };

        let mut action = result.action;
        if let Some(out) = output {
            if let Some(stride) = output_stride {
                debug_assert_eq!(out.len(), frames * stride);
            }
            let n = result.data.len().min(out.len());
            out[..n].copy_from_slice(&result.data[..n]);
            if n < out.len() {
                // Short output always pads with silence and ends the
                // stream, whatever continuation the callback asked for.
                out[n..].fill(0);
                action = Continuation::Complete;
            }
        }

        if frames > 0 && sample_rate > 0 {
            let period_secs = frames as f64 / sample_rate as f64;
            shared.update_load(begin.elapsed().as_secs_f64() / period_secs);
        }
        action
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_output_period(
        period_fn: &mut PeriodFn,
        frames: usize,
        stride: usize,
    ) -> (Vec<u8>, Continuation) {
        let mut buffer = vec![0u8; frames * stride];
        let outcome = period_fn(EnginePeriod {
            input: None,
            output: Some(&mut buffer),
            frames,
            time: StreamTimeInfo::default(),
            flags: StatusFlags::empty(),
        });
        (buffer, outcome)
    }

    #[test]
    fn short_output_is_padded_and_forced_complete() {
        let shared = BridgeShared::new();
        let callback: Box<StreamCallback> =
            Box::new(|_, _, _, _| CallbackResult::continue_with(vec![0xAB; 100]));
        let mut period_fn = adapter(callback, Some(4), 48_000, shared.clone());

        let (buffer, outcome) = run_output_period(&mut period_fn, 128, 4);
        // The callback asked for Continue; the short buffer overrides it
        assert_eq!(outcome, Continuation::Complete);
        assert!(buffer[..100].iter().all(|&b| b == 0xAB));
        assert!(buffer[100..].iter().all(|&b| b == 0));
        assert!(shared.take_error().is_none());
    }

    #[test]
    fn exact_output_keeps_requested_continuation() {
        let shared = BridgeShared::new();
        let callback: Box<StreamCallback> =
            Box::new(|_, frames, _, _| CallbackResult::continue_with(vec![0x7F; frames * 4]));
        let mut period_fn = adapter(callback, Some(4), 48_000, shared);

        let (buffer, outcome) = run_output_period(&mut period_fn, 64, 4);
        assert_eq!(outcome, Continuation::Continue);
        assert!(buffer.iter().all(|&b| b == 0x7F));
    }

    #[test]
    fn short_output_overrides_abort_too() {
        let shared = BridgeShared::new();
        let callback: Box<StreamCallback> =
            Box::new(|_, _, _, _| CallbackResult::new(vec![1u8; 8], Continuation::Abort));
        let mut period_fn = adapter(callback, Some(4), 48_000, shared);

        let (_, outcome) = run_output_period(&mut period_fn, 16, 4);
        assert_eq!(outcome, Continuation::Complete);
    }

    #[test]
    fn panic_aborts_and_records_a_pending_error() {
        let shared = BridgeShared::new();
        let callback: Box<StreamCallback> = Box::new(|_, _, _, _| panic!("boom"));
        let mut period_fn = adapter(callback, Some(4), 48_000, shared.clone());

        let (_, outcome) = run_output_period(&mut period_fn, 32, 4);
        assert_eq!(outcome, Continuation::Abort);
        match shared.take_error() {
            Some(Error::CallbackPanic(message)) => assert_eq!(message, "boom"),
            other => panic!("expected a callback panic error, got {:?}", other),
        }
        // The slot reports once
        assert!(shared.take_error().is_none());
    }

    #[test]
    fn input_only_streams_pass_the_continuation_through() {
        let shared = BridgeShared::new();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: Box<StreamCallback> = Box::new(move |input, frames, _, _| {
            sink.lock().push((input.map(<[u8]>::to_vec), frames));
            CallbackResult::complete_with(Bytes::new())
        });
        let mut period_fn = adapter(callback, None, 48_000, shared);

        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let outcome = period_fn(EnginePeriod {
            input: Some(&input),
            output: None,
            frames: 2,
            time: StreamTimeInfo::default(),
            flags: StatusFlags::INPUT_OVERFLOW,
        });
        assert_eq!(outcome, Continuation::Complete);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Some(input.to_vec()), 2));
    }

    #[test]
    fn first_recorded_error_wins() {
        let shared = BridgeShared::new();
        shared.record_error(Error::CallbackPanic("first".into()));
        shared.record_error(Error::CallbackPanic("second".into()));
        match shared.take_error() {
            Some(Error::CallbackPanic(message)) => assert_eq!(message, "first"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
