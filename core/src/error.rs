use crate::platform::PlatformError;
use thiserror::Error;

/// Why a received byte buffer could not be turned into a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame checksum mismatch")]
    ChecksumFailed,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Error)]
pub enum AudioModemError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Unknown modem profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload of {len} bytes does not fit a {max}-byte frame")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Transmission already in progress")]
    TransmitInProgress,

    #[error("Audio handle is closed")]
    HandleClosed,

    #[error("Failed to detect preamble")]
    PreambleNotFound,

    #[error("Invalid frame size")]
    InvalidFrameSize,

    #[error("Invalid input size")]
    InvalidInputSize,

    #[error("Insufficient data")]
    InsufficientData,

    #[error("FFT error: {0}")]
    FftError(String),

    #[error("FEC error: {0}")]
    FecError(String),
}

pub type Result<T> = std::result::Result<T, AudioModemError>;
