//! Error types for the audio bridge
//!
//! Two classes matter to callers: argument errors detected before any
//! engine call, and engine errors carrying the engine's numeric code.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Bad argument shape or range. Raised before the native engine or any
    /// stream state is touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by the audio engine, with its error code.
    #[error("engine error [{}]: {}", .0.raw(), .1)]
    Engine(ErrorCode, String),

    /// A stream callback panicked on the real-time thread. Recorded against
    /// the owning thread and observed on its next stream operation.
    #[error("stream callback panicked: {0}")]
    CallbackPanic(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Engine failure with an explicit code
    pub fn engine(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Engine(code, message.into())
    }

    /// The error every operation on a closed stream reports
    pub fn stream_closed() -> Self {
        Error::engine(ErrorCode::BadStreamPtr, "Stream closed")
    }

    /// Engine code carried by this error, if any
    pub fn engine_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Engine(code, _) => Some(*code),
            _ => None,
        }
    }
}

/// Engine error codes. Values mirror the native engine's error enum and are
/// part of the stable external vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    NotInitialized = -10_000,
    UnanticipatedHostError = -9_999,
    InvalidChannelCount = -9_998,
    InvalidSampleRate = -9_997,
    InvalidDevice = -9_996,
    InvalidFlag = -9_995,
    SampleFormatNotSupported = -9_994,
    BadIoDeviceCombination = -9_993,
    InsufficientMemory = -9_992,
    BufferTooBig = -9_991,
    BufferTooSmall = -9_990,
    NullCallback = -9_989,
    BadStreamPtr = -9_988,
    TimedOut = -9_987,
    InternalError = -9_986,
    DeviceUnavailable = -9_985,
    IncompatibleHostApiSpecificStreamInfo = -9_984,
    StreamIsStopped = -9_983,
    StreamIsNotStopped = -9_982,
    InputOverflowed = -9_981,
    OutputUnderflowed = -9_980,
    HostApiNotFound = -9_979,
    InvalidHostApi = -9_978,
    CanNotReadFromACallbackStream = -9_977,
    CanNotWriteToACallbackStream = -9_976,
    CanNotReadFromAnOutputOnlyStream = -9_975,
    CanNotWriteToAnInputOnlyStream = -9_974,
    IncompatibleStreamHostApi = -9_973,
    BadBufferPtr = -9_972,
}

impl ErrorCode {
    /// Numeric value as reported by the engine
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Human-readable text for the code
    pub fn text(self) -> &'static str {
        use ErrorCode::*;
        match self {
            NoError => "Success",
            NotInitialized => "Audio system not initialized",
            UnanticipatedHostError => "Unanticipated host error",
            InvalidChannelCount => "Invalid number of channels",
            InvalidSampleRate => "Invalid sample rate",
            InvalidDevice => "Invalid device",
            InvalidFlag => "Invalid flag",
            SampleFormatNotSupported => "Sample format not supported",
            BadIoDeviceCombination => "Illegal combination of I/O devices",
            InsufficientMemory => "Insufficient memory",
            BufferTooBig => "Buffer too big",
            BufferTooSmall => "Buffer too small",
            NullCallback => "No callback routine specified",
            BadStreamPtr => "Invalid stream",
            TimedOut => "Wait timed out",
            InternalError => "Internal error",
            DeviceUnavailable => "Device unavailable",
            IncompatibleHostApiSpecificStreamInfo => {
                "Incompatible host API specific stream info"
            }
            StreamIsStopped => "Stream is stopped",
            StreamIsNotStopped => "Stream is not stopped",
            InputOverflowed => "Input overflowed",
            OutputUnderflowed => "Output underflowed",
            HostApiNotFound => "Host API not found",
            InvalidHostApi => "Invalid host API",
            CanNotReadFromACallbackStream => "Can't read from a callback stream",
            CanNotWriteToACallbackStream => "Can't write to a callback stream",
            CanNotReadFromAnOutputOnlyStream => "Can't read from an output only stream",
            CanNotWriteToAnInputOnlyStream => "Can't write to an input only stream",
            IncompatibleStreamHostApi => "Incompatible stream host API",
            BadBufferPtr => "Invalid buffer pointer",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
