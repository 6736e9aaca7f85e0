//! Blocking I/O plumbing
//!
//! Synchronous read/write streams install a pump as the engine period
//! function: captured input bytes are pushed into an SPSC ring for the
//! owning thread to read, and output periods are filled from a ring the
//! owning thread writes into. Ring shortfalls surface as the engine's
//! overflow/underflow conditions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use crate::engine::{EnginePeriod, PeriodFn, StreamSpec};
use crate::format::Continuation;

/// Overflow/underflow conditions noted by the pump, consumed by the next
/// read/write on the owning thread
#[derive(Default)]
struct IoFlags {
    input_overflowed: AtomicBool,
    output_underflowed: AtomicBool,
}

/// Owning-thread half of a blocking stream's ring buffers
pub(crate) struct BlockingIo {
    input_rx: Option<HeapConsumer<u8>>,
    output_tx: Option<HeapProducer<u8>>,
    flags: Arc<IoFlags>,
}

impl BlockingIo {
    /// Build the rings sized for `ring_periods` periods of slack and the
    /// pump to hand to the engine
    pub fn new(spec: &StreamSpec, frames_per_buffer: u32, ring_periods: usize) -> (Self, PeriodFn) {
        let flags = Arc::new(IoFlags::default());
        let period_frames = frames_per_buffer as usize;

        let (input_tx, input_rx) = match spec.input_stride() {
            Some(stride) => {
                let (tx, rx) = HeapRb::<u8>::new(stride * period_frames * ring_periods).split();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let (output_tx, output_rx) = match spec.output_stride() {
            Some(stride) => {
                let (tx, rx) = HeapRb::<u8>::new(stride * period_frames * ring_periods).split();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let pump = pump(input_tx, output_rx, flags.clone());
        let io = Self {
            input_rx,
            output_tx,
            flags,
        };
        (io, pump)
    }

    /// Pop captured bytes; returns how many were available
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        match &mut self.input_rx {
            Some(rx) => rx.pop_slice(buf),
            None => 0,
        }
    }

    /// Push bytes for playback; returns how many fit
    pub fn write_bytes(&mut self, data: &[u8]) -> usize {
        match &mut self.output_tx {
            Some(tx) => tx.push_slice(data),
            None => 0,
        }
    }

    /// Captured bytes waiting to be read
    pub fn read_available_bytes(&self) -> usize {
        self.input_rx.as_ref().map(HeapConsumer::len).unwrap_or(0)
    }

    /// Ring space left for writing
    pub fn write_available_bytes(&self) -> usize {
        self.output_tx
            .as_ref()
            .map(HeapProducer::free_len)
            .unwrap_or(0)
    }

    /// Consume the input overflow condition, if one occurred
    pub fn take_input_overflow(&self) -> bool {
        self.flags.input_overflowed.swap(false, Ordering::AcqRel)
    }

    /// Consume the output underflow condition, if one occurred
    pub fn take_output_underflow(&self) -> bool {
        self.flags.output_underflowed.swap(false, Ordering::AcqRel)
    }
}

fn pump(
    mut input_tx: Option<HeapProducer<u8>>,
    mut output_rx: Option<HeapConsumer<u8>>,
    flags: Arc<IoFlags>,
) -> PeriodFn {
    Box::new(move |period: EnginePeriod<'_>| {
        if let (Some(bytes), Some(tx)) = (period.input, input_tx.as_mut()) {
            // A full ring means the reader is too slow; drop the tail
            if tx.push_slice(bytes) < bytes.len() {
                flags.input_overflowed.store(true, Ordering::Release);
            }
        }
        if let (Some(out), Some(rx)) = (period.output, output_rx.as_mut()) {
            let got = rx.pop_slice(out);
            if got < out.len() {
                out[got..].fill(0);
                flags.output_underflowed.store(true, Ordering::Release);
            }
        }
        Continuation::Continue
    })
}
