//! # Audio I/O Bridge
//!
//! Stream lifecycle (open, start, stop, read, write, close) and
//! device/host-API enumeration over native audio engines, with a
//! real-time-safe callback bridge.
//!
//! ## Architecture Overview
//!
//! ```text
//! owning thread                                  real-time thread
//! ┌──────────────────────────────┐               ┌─────────────────────────┐
//! │ AudioSystem (host)           │               │ Engine period callback  │
//! │   ├─ enumeration queries     │               │   (cpal stream thread)  │
//! │   └─ open ──► Stream ────────┼───────────────┼──────────┐              │
//! │               │              │               │          ▼              │
//! │   callback    │  blocking    │               │  Callback bridge        │
//! │   mode        │  mode        │               │  (stream::bridge)       │
//! │               │              │               │    marshal input/flags  │
//! │ take_callback_error ◄────────┼── pending ────┼──  invoke callback      │
//! │               │              │    error      │    copy/pad output      │
//! │ read/write ◄──┴── SPSC rings ┼───────────────┼──► ring pump            │
//! │   (stream, sync)             │               │    (blocking mode)      │
//! └──────────────────────────────┘               └─────────────────────────┘
//! ```
//!
//! Exactly one mode holds per stream: a registered callback runs on the
//! engine's real-time thread and returns samples plus a continuation code,
//! or the stream is blocking and the owning thread exchanges samples
//! synchronously through lock-free rings.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod host;
pub mod stream;

pub use engine::{
    DeviceInfo, DirectionParams, Engine, EngineStream, HostApiInfo, HostApiTypeId, HostExtension,
    StreamInfo, StreamSpec, StreamTimeInfo,
};
pub use error::{Error, ErrorCode, Result};
pub use format::{
    buffer_len, frame_stride, frames_in_buffer, sample_size, Continuation, SampleFormat,
    StatusFlags,
};
pub use host::{AudioSystem, FormatQuery};
pub use stream::bridge::{CallbackResult, StreamCallback};
pub use stream::{Stream, StreamMode, StreamOptions};

/// Crate-wide constants
pub mod constants {
    /// Default sample rate for stream defaults
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames-per-buffer value that lets the engine choose
    pub const FRAMES_PER_BUFFER_UNSPECIFIED: u32 = 0;

    /// Period size assumed when the engine chooses the buffer size
    pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 1024;

    /// Periods of slack in each blocking-mode ring buffer
    pub const RING_PERIODS: usize = 8;
}
