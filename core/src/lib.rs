//! Near-ultrasonic acoustic data link for handing a wallet token from one
//! device to another
//!
//! Payloads are framed with a checksum, protected by convolutional FEC and sent
//! as continuous-phase FSK around a 15 kHz carrier behind a chirp preamble.

pub mod error;
pub mod payload;
pub mod profile;
pub mod framing;
pub mod fec;
pub mod trellis;
pub mod fsk;
pub mod sync;
pub mod fft_correlation;
pub mod resample;
pub mod encoder;
pub mod decoder;
pub mod platform;
pub mod transmitter;
pub mod receiver;
pub mod level;
pub mod config;
pub mod session;

pub use config::{FallbackConfig, SessionConfig};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{AudioModemError, DecodeError, Result};
pub use level::LevelMonitor;
pub use payload::{PayloadFormat, TransferPayload};
pub use platform::{AudioInput, AudioOutput, AudioPlatform, CapabilityStatus, CaptureSupport};
pub use profile::ModemProfile;
pub use receiver::Receiver;
pub use session::{HostBridge, SessionEvent, SessionStatus, TransferError, TransferSession, TransferState};
pub use transmitter::Transmitter;

// Audio configuration
pub const MODEM_SAMPLE_RATE: u32 = 48000;

// Burst layout
pub const LEAD_SAMPLES: usize = 480; // 10 ms of silence before the preamble
pub const PREAMBLE_SAMPLES: usize = 2048; // ~43 ms chirp
pub const PREAMBLE_TAPER_SAMPLES: usize = 64;
pub const PREAMBLE_BANDWIDTH: f32 = 3000.0; // Hz, centered on the carrier
pub const PREAMBLE_THRESHOLD: f32 = 0.4;

// Frame configuration
pub const FRAME_HEADER_SIZE: usize = 2; // payload length (2)
pub const MAX_FRAME_LENGTH: usize = 255;

// Session defaults
pub const DEFAULT_PROFILE_NAME: &str = "default";
pub const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 12;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;
