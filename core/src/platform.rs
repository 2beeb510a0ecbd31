//! Audio capabilities supplied by the host environment
//!
//! The modem never touches a device directly. A host hands the session an
//! [`AudioPlatform`] that can open one output route or one capture stream at a
//! time; tests substitute in-memory doubles.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Audio capture unsupported: {0}")]
    CaptureUnsupported(String),

    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

/// Readiness of the platform's audio stack, polled before a transfer starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    Ready,
    NotReady,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSupport {
    Supported,
    /// Capture can never work here; the receive role has to move elsewhere
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Finished,
    Failed(String),
}

pub trait AudioOutput {
    fn sample_rate(&self) -> u32;

    /// Start playing `samples` once. Returns immediately.
    fn play(&mut self, samples: Vec<f32>) -> Result<(), PlatformError>;

    fn poll(&mut self) -> PlaybackStatus;

    /// Samples played so far.
    fn position(&self) -> usize;

    /// Silence the route at once and release it.
    fn stop(&mut self);
}

pub trait AudioInput {
    fn sample_rate(&self) -> u32;

    /// Append every sample captured since the last read; returns the count.
    fn read(&mut self, buf: &mut Vec<f32>) -> Result<usize, PlatformError>;

    /// Release the capture stream at once.
    fn close(&mut self);
}

pub trait AudioPlatform {
    fn status(&self) -> CapabilityStatus;

    fn capture_support(&self) -> CaptureSupport;

    fn open_output(&mut self) -> Result<Box<dyn AudioOutput>, PlatformError>;

    fn open_input(&mut self) -> Result<Box<dyn AudioInput>, PlatformError>;
}

/// What the host knows about the browser it runs in.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub has_get_user_media: bool,
}

impl DeviceInfo {
    pub fn new(user_agent: impl Into<String>, has_get_user_media: bool) -> Self {
        Self {
            user_agent: user_agent.into(),
            has_get_user_media,
        }
    }

    pub fn is_ios(&self) -> bool {
        let agent = self.user_agent.to_lowercase();
        ["iphone", "ipad", "ipod"].iter().any(|device| agent.contains(device))
    }

    /// The Telegram in-app web view on iOS exposes no microphone at all.
    pub fn is_ios_embedded_webview(&self) -> bool {
        self.is_ios() && self.user_agent.contains("Telegram") && !self.has_get_user_media
    }

    pub fn capture_support(&self) -> CaptureSupport {
        if self.is_ios_embedded_webview() {
            CaptureSupport::Unavailable {
                reason: "the in-app browser on iOS cannot record audio".to_string(),
            }
        } else if !self.has_get_user_media {
            CaptureSupport::Unavailable {
                reason: "this browser does not support audio capture".to_string(),
            }
        } else {
            CaptureSupport::Supported
        }
    }
}
