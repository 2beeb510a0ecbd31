use crate::decoder::Decoder;
use crate::error::{AudioModemError, Result};
use crate::level::LevelSource;
use crate::payload::TransferPayload;
use crate::platform::{AudioInput, AudioPlatform, CaptureSupport, PlatformError};
use crate::profile::{require_profile, ModemProfile};
use crate::resample::Resampler;
use crate::sync::PreambleMatch;
use crate::{MODEM_SAMPLE_RATE, PREAMBLE_SAMPLES};

/// Samples kept ahead of a partially received frame so that the preamble
/// search can settle on the same peak once the rest arrives.
const PENDING_MARGIN: usize = 256;

/// Device-rate samples retained for level metering.
const RECENT_SAMPLES: usize = 1024;

/// Incremental frame recovery over a modem-rate sample stream
///
/// Buffers input until a whole frame could fit, searches for the earliest
/// preamble, decodes the frame behind it and reports well-formed payloads.
/// Frames that fail the checksum or carry a malformed payload are dropped.
pub struct FrameSync {
    decoder: Decoder,
    buffer: Vec<f32>,
    /// Buffer length required before the next search
    needed: usize,
}

impl FrameSync {
    pub fn new(profile: &ModemProfile) -> Result<Self> {
        let decoder = Decoder::new(profile)?;
        let needed = profile.frame_samples();
        Ok(Self {
            decoder,
            buffer: Vec::new(),
            needed,
        })
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed modem-rate samples; returns payloads in the order they complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<TransferPayload> {
        self.buffer.extend_from_slice(samples);
        let frame_len = self.decoder.profile().frame_samples();
        let mut payloads = Vec::new();

        while self.buffer.len() >= self.needed {
            let found = match self.decoder.detector_mut().detect(&self.buffer) {
                Ok(found) => found,
                Err(e) => {
                    log::warn!("preamble search failed: {}", e);
                    None
                }
            };

            let PreambleMatch { position, score } = match found {
                Some(found) => found,
                None => {
                    // A preamble may still be starting in the tail
                    let keep_from = self.buffer.len().saturating_sub(PREAMBLE_SAMPLES);
                    self.buffer.drain(..keep_from);
                    self.needed = frame_len;
                    break;
                }
            };

            if position + frame_len > self.buffer.len() {
                let keep_from = position.saturating_sub(PENDING_MARGIN);
                self.buffer.drain(..keep_from);
                self.needed = (position - keep_from) + frame_len;
                break;
            }

            match self.decode_at(position) {
                Ok(payload) => {
                    log::debug!("frame at {} (score {:.2}) accepted", position, score);
                    payloads.push(payload);
                    self.buffer.drain(..position + frame_len);
                }
                Err(e) => {
                    log::debug!("frame at {} (score {:.2}) dropped: {}", position, score, e);
                    self.buffer.drain(..position + PREAMBLE_SAMPLES);
                }
            }
            self.needed = frame_len;
        }

        payloads
    }

    fn decode_at(&self, position: usize) -> Result<TransferPayload> {
        let bytes = self.decoder.decode_aligned(&self.buffer[position..])?;
        let format = self.decoder.profile().payload_format;
        Ok(TransferPayload::decode(&bytes, format)?)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.needed = self.decoder.profile().frame_samples();
    }
}

/// Device-rate front end: resamples to the modem rate, then frames.
pub struct StreamDecoder {
    resampler: Resampler,
    sync: FrameSync,
}

impl StreamDecoder {
    pub fn new(profile: &ModemProfile, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            resampler: Resampler::new(sample_rate, MODEM_SAMPLE_RATE, &profile.resampler)?,
            sync: FrameSync::new(profile)?,
        })
    }

    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<TransferPayload>> {
        let converted = self.resampler.process(samples)?;
        Ok(self.sync.push(&converted))
    }

    /// Drain the resampler and search what is left.
    pub fn finish(&mut self) -> Result<Vec<TransferPayload>> {
        let converted = self.resampler.flush()?;
        Ok(self.sync.push(&converted))
    }
}

pub type FrameCallback = Box<dyn FnMut(TransferPayload)>;
pub type FailCallback = Box<dyn FnMut(AudioModemError)>;

/// Listens on a capture stream until destroyed, reporting every valid frame.
pub struct Receiver {
    input: Option<Box<dyn AudioInput>>,
    stream: Option<StreamDecoder>,
    recent: Vec<f32>,
    scratch: Vec<f32>,
    on_receive_frame: FrameCallback,
    on_fail: FailCallback,
}

impl Receiver {
    /// Look up the profile and open the capture stream. Failures are reported
    /// through `on_fail` before this returns and leave the handle closed.
    pub fn create(
        profile_name: &str,
        platform: &mut dyn AudioPlatform,
        on_receive_frame: impl FnMut(TransferPayload) + 'static,
        on_fail: impl FnMut(AudioModemError) + 'static,
    ) -> Self {
        let mut receiver = Self {
            input: None,
            stream: None,
            recent: Vec::new(),
            scratch: Vec::new(),
            on_receive_frame: Box::new(on_receive_frame),
            on_fail: Box::new(on_fail),
        };

        match Self::open(profile_name, platform) {
            Ok((input, stream)) => {
                log::debug!(
                    "receiver listening: profile '{}', input at {} Hz",
                    profile_name,
                    input.sample_rate()
                );
                receiver.input = Some(input);
                receiver.stream = Some(stream);
            }
            Err(e) => {
                log::warn!("receiver unavailable: {}", e);
                (receiver.on_fail)(e);
            }
        }
        receiver
    }

    fn open(
        profile_name: &str,
        platform: &mut dyn AudioPlatform,
    ) -> Result<(Box<dyn AudioInput>, StreamDecoder)> {
        let profile = require_profile(profile_name)?;
        if let CaptureSupport::Unavailable { reason } = platform.capture_support() {
            return Err(PlatformError::CaptureUnsupported(reason).into());
        }
        let input = platform.open_input()?;
        let stream = StreamDecoder::new(&profile, input.sample_rate())?;
        Ok((input, stream))
    }

    pub fn is_listening(&self) -> bool {
        self.input.is_some()
    }

    /// Pull captured audio and report any completed frames.
    pub fn poll(&mut self) {
        let (input, stream) = match (self.input.as_mut(), self.stream.as_mut()) {
            (Some(input), Some(stream)) => (input, stream),
            _ => return,
        };

        self.scratch.clear();
        if let Err(e) = input.read(&mut self.scratch) {
            log::warn!("capture stream failed: {}", e);
            self.release();
            (self.on_fail)(e.into());
            return;
        }
        if self.scratch.is_empty() {
            return;
        }

        self.recent.extend_from_slice(&self.scratch);
        if self.recent.len() > RECENT_SAMPLES {
            let excess = self.recent.len() - RECENT_SAMPLES;
            self.recent.drain(..excess);
        }

        let received = match stream.push(&self.scratch) {
            Ok(received) => received,
            Err(e) => {
                log::warn!("capture stream could not be decoded: {}", e);
                self.release();
                (self.on_fail)(e);
                return;
            }
        };
        for payload in received {
            log::info!("received token {} ({})", payload.token_id(), payload.amount());
            (self.on_receive_frame)(payload);
        }
    }

    /// Release the capture stream at once. No callback fires afterwards.
    pub fn destroy(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
        self.stream = None;
        self.recent.clear();
    }
}

impl LevelSource for Receiver {
    fn level_window(&self, len: usize) -> Vec<f32> {
        let take = self.recent.len().min(len);
        let mut window = vec![0.0; len - take];
        window.extend_from_slice(&self.recent[self.recent.len() - take..]);
        window
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.release();
    }
}
