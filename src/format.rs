//! Sample formats, status flags, continuation codes and the frame codec
//!
//! The frame codec is the only arithmetic in the crate that sizes buffers
//! exchanged with the engine: a buffer for `frames` frames always spans
//! `frames * channels * sample width` bytes.

use crate::error::{Error, Result};

/// Sample formats understood by the bridge. Values mirror the native
/// engine's format bits and are part of the stable external vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SampleFormat {
    Float32 = 0x01,
    Int32 = 0x02,
    Int24 = 0x04,
    Int16 = 0x08,
    Int8 = 0x10,
    UInt8 = 0x20,
}

impl SampleFormat {
    /// Width of one sample in bytes
    pub fn width(self) -> usize {
        match self {
            SampleFormat::Float32 | SampleFormat::Int32 => 4,
            SampleFormat::Int24 => 3,
            SampleFormat::Int16 => 2,
            SampleFormat::Int8 | SampleFormat::UInt8 => 1,
        }
    }

    /// Raw format bit as exported to callers
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Parse a raw format bit
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0x01 => Ok(SampleFormat::Float32),
            0x02 => Ok(SampleFormat::Int32),
            0x04 => Ok(SampleFormat::Int24),
            0x08 => Ok(SampleFormat::Int16),
            0x10 => Ok(SampleFormat::Int8),
            0x20 => Ok(SampleFormat::UInt8),
            other => Err(Error::InvalidArgument(format!(
                "unknown sample format: {:#x}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::Float32 => "float32",
            SampleFormat::Int32 => "int32",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int16 => "int16",
            SampleFormat::Int8 => "int8",
            SampleFormat::UInt8 => "uint8",
        }
    }
}

/// Width in bytes of one sample of `format`
pub fn sample_size(format: SampleFormat) -> usize {
    format.width()
}

/// Continuation code returned by a stream callback: keep running, finish
/// after this buffer, or terminate immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Continuation {
    Continue = 0,
    Complete = 1,
    Abort = 2,
}

impl Continuation {
    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// Status flag bitmask handed to stream callbacks. Bit values mirror the
/// native engine's callback flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub const INPUT_UNDERFLOW: StatusFlags = StatusFlags(0x01);
    pub const INPUT_OVERFLOW: StatusFlags = StatusFlags(0x02);
    pub const OUTPUT_UNDERFLOW: StatusFlags = StatusFlags(0x04);
    pub const OUTPUT_OVERFLOW: StatusFlags = StatusFlags(0x08);
    pub const PRIMING_OUTPUT: StatusFlags = StatusFlags(0x10);

    pub fn empty() -> Self {
        StatusFlags(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: StatusFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = StatusFlags;

    fn bitor(self, rhs: StatusFlags) -> StatusFlags {
        StatusFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: StatusFlags) {
        self.0 |= rhs.0;
    }
}

/// Bytes spanned by one frame: `channels * sample width`
pub fn frame_stride(channels: u16, format: SampleFormat) -> Result<usize> {
    if channels < 1 {
        return Err(Error::InvalidArgument("invalid audio channels".into()));
    }
    Ok(channels as usize * format.width())
}

/// Byte length of a buffer holding `frames` interleaved frames
pub fn buffer_len(frames: i64, channels: u16, format: SampleFormat) -> Result<usize> {
    if frames < 0 {
        return Err(Error::InvalidArgument("invalid number of frames".into()));
    }
    let stride = frame_stride(channels, format)?;
    (frames as usize).checked_mul(stride).ok_or_else(|| {
        Error::InvalidArgument(format!("frame count overflows buffer size: {}", frames))
    })
}

/// Whole frames contained in a buffer of `len` bytes (bounds-checked
/// inverse of [`buffer_len`]; trailing partial frames are not counted)
pub fn frames_in_buffer(len: usize, channels: u16, format: SampleFormat) -> Result<i64> {
    let stride = frame_stride(channels, format)?;
    Ok((len / stride) as i64)
}
