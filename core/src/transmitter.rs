use crate::encoder::Encoder;
use crate::error::{AudioModemError, Result};
use crate::level::LevelSource;
use crate::platform::{AudioOutput, AudioPlatform, PlaybackStatus, PlatformError};
use crate::profile::require_profile;
use std::time::{Duration, Instant};

pub type FinishCallback = Box<dyn FnMut()>;
pub type FailCallback = Box<dyn FnMut(AudioModemError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    /// Output route open, waiting for a payload
    Ready,
    /// Burst encoded, waiting for the route to settle
    Settling,
    Playing,
    Finished,
    Failed,
    Destroyed,
}

/// Plays one encoded burst through an output route.
///
/// Every accepted `transmit` ends in exactly one `on_finish` or one
/// `on_fail`. A handle carries a single transmission; destroy it and create
/// a new one to send again.
pub struct Transmitter {
    encoder: Option<Encoder>,
    output: Option<Box<dyn AudioOutput>>,
    state: TransmitterState,
    settle_delay: Duration,
    start_at: Option<Instant>,
    burst: Vec<f32>,
    on_finish: FinishCallback,
    on_fail: FailCallback,
}

impl Transmitter {
    /// Look up the profile and open the output route. Failures are reported
    /// through `on_fail` before this returns and leave the handle `Failed`.
    pub fn create(
        profile_name: &str,
        platform: &mut dyn AudioPlatform,
        on_finish: impl FnMut() + 'static,
        on_fail: impl FnMut(AudioModemError) + 'static,
    ) -> Self {
        let mut transmitter = Self {
            encoder: None,
            output: None,
            state: TransmitterState::Ready,
            settle_delay: Duration::ZERO,
            start_at: None,
            burst: Vec::new(),
            on_finish: Box::new(on_finish),
            on_fail: Box::new(on_fail),
        };

        let opened = require_profile(profile_name)
            .and_then(|profile| Encoder::new(&profile))
            .and_then(|encoder| {
                let output = platform.open_output()?;
                Ok((encoder, output))
            });

        match opened {
            Ok((encoder, output)) => {
                log::debug!(
                    "transmitter ready: profile '{}', output at {} Hz",
                    profile_name,
                    output.sample_rate()
                );
                transmitter.encoder = Some(encoder);
                transmitter.output = Some(output);
            }
            Err(e) => {
                log::warn!("transmitter unavailable: {}", e);
                transmitter.fail(e);
            }
        }
        transmitter
    }

    /// Wait this long after `transmit` before playback starts.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn state(&self) -> TransmitterState {
        self.state
    }

    /// Encode `bytes` and schedule playback. A handle that already accepted a
    /// transmission rejects further calls without touching the first one.
    pub fn transmit(&mut self, bytes: &[u8], now: Instant) -> Result<()> {
        match self.state {
            TransmitterState::Ready => {}
            TransmitterState::Settling | TransmitterState::Playing | TransmitterState::Finished => {
                return Err(AudioModemError::TransmitInProgress)
            }
            TransmitterState::Failed | TransmitterState::Destroyed => {
                return Err(AudioModemError::HandleClosed)
            }
        }

        let (encoder, output) = match (&self.encoder, &self.output) {
            (Some(encoder), Some(output)) => (encoder, output),
            _ => return Err(AudioModemError::HandleClosed),
        };

        match encoder.encode_at_rate(bytes, output.sample_rate()) {
            Ok(burst) => {
                log::info!(
                    "transmitting {} bytes as {:.2}s of audio",
                    bytes.len(),
                    burst.len() as f32 / output.sample_rate() as f32
                );
                self.burst = burst;
                self.start_at = Some(now + self.settle_delay);
                self.state = TransmitterState::Settling;
                self.poll(now);
            }
            Err(e) => self.fail(e),
        }
        Ok(())
    }

    /// Advance playback. Fires `on_finish` or `on_fail` at most once.
    pub fn poll(&mut self, now: Instant) {
        match self.state {
            TransmitterState::Settling => {
                if self.start_at.map_or(false, |at| now < at) {
                    return;
                }
                let burst = self.burst.clone();
                let started = match self.output.as_mut() {
                    Some(output) => output.play(burst),
                    None => Err(PlatformError::OutputUnavailable("output route closed".to_string())),
                };
                match started {
                    Ok(()) => self.state = TransmitterState::Playing,
                    Err(e) => self.fail(e.into()),
                }
            }
            TransmitterState::Playing => {
                let status = match self.output.as_mut() {
                    Some(output) => output.poll(),
                    None => PlaybackStatus::Failed("output route closed".to_string()),
                };
                match status {
                    PlaybackStatus::Playing => {}
                    PlaybackStatus::Finished => {
                        self.release();
                        self.state = TransmitterState::Finished;
                        (self.on_finish)();
                    }
                    PlaybackStatus::Failed(reason) => {
                        self.fail(PlatformError::Device(reason).into());
                    }
                }
            }
            _ => {}
        }
    }

    /// Stop sound at once and release the route. No callback fires afterwards.
    pub fn destroy(&mut self) {
        if self.state != TransmitterState::Destroyed {
            self.release();
            self.encoder = None;
            self.state = TransmitterState::Destroyed;
        }
    }

    fn release(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
    }

    fn fail(&mut self, error: AudioModemError) {
        self.release();
        self.state = TransmitterState::Failed;
        (self.on_fail)(error);
    }
}

impl LevelSource for Transmitter {
    fn level_window(&self, len: usize) -> Vec<f32> {
        let played = match (&self.state, &self.output) {
            (TransmitterState::Playing, Some(output)) => output.position().min(self.burst.len()),
            _ => 0,
        };
        let start = played.saturating_sub(len);
        let mut window = vec![0.0; len - (played - start)];
        window.extend_from_slice(&self.burst[start..played]);
        window
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.destroy();
    }
}
