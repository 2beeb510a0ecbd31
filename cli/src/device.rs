//! WAV-file stand-ins for a speaker and a microphone
//!
//! Both routes run in wall-clock time so the session sees audio arrive and
//! drain at the same pace a real device would deliver it.

use hound::{SampleFormat, WavSpec};
use sonicpay_core::platform::{PlaybackStatus, PlatformError};
use sonicpay_core::resample::downmix;
use sonicpay_core::session::ClaimError;
use sonicpay_core::{AudioInput, AudioOutput, AudioPlatform, CapabilityStatus, CaptureSupport, HostBridge};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use url::Url;

use crate::CliError;

/// Mono samples in [-1, 1] and the rate they were recorded at.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), CliError> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    tracing::info!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (_, bits) => return Err(CliError::UnsupportedWav(bits)),
    };

    Ok((downmix(&interleaved, spec.channels as usize), spec.sample_rate))
}

/// Write mono 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn samples_since(started: Instant, sample_rate: u32) -> usize {
    (started.elapsed().as_secs_f64() * sample_rate as f64) as usize
}

pub struct FilePlatform {
    output: Option<(PathBuf, u32)>,
    input: Option<(Vec<f32>, u32)>,
}

impl FilePlatform {
    /// Plays into a WAV file at `sample_rate`.
    pub fn speaker(path: PathBuf, sample_rate: u32) -> Self {
        Self {
            output: Some((path, sample_rate)),
            input: None,
        }
    }

    /// Captures from a recording, followed by silence.
    pub fn microphone(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            output: None,
            input: Some((samples, sample_rate)),
        }
    }
}

impl AudioPlatform for FilePlatform {
    fn status(&self) -> CapabilityStatus {
        CapabilityStatus::Ready
    }

    fn capture_support(&self) -> CaptureSupport {
        if self.input.is_some() {
            CaptureSupport::Supported
        } else {
            CaptureSupport::Unavailable {
                reason: "no recording given".to_string(),
            }
        }
    }

    fn open_output(&mut self) -> Result<Box<dyn AudioOutput>, PlatformError> {
        let (path, sample_rate) = self
            .output
            .clone()
            .ok_or_else(|| PlatformError::OutputUnavailable("no output file given".to_string()))?;
        Ok(Box::new(WavOutput {
            path,
            sample_rate,
            samples: Vec::new(),
            started: None,
            written: false,
        }))
    }

    fn open_input(&mut self) -> Result<Box<dyn AudioInput>, PlatformError> {
        let (samples, sample_rate) = self
            .input
            .take()
            .ok_or_else(|| PlatformError::CaptureUnsupported("recording already consumed".to_string()))?;
        Ok(Box::new(WavInput {
            samples,
            sample_rate,
            cursor: 0,
            started: Instant::now(),
        }))
    }
}

struct WavOutput {
    path: PathBuf,
    sample_rate: u32,
    samples: Vec<f32>,
    started: Option<Instant>,
    written: bool,
}

impl AudioOutput for WavOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, samples: Vec<f32>) -> Result<(), PlatformError> {
        self.samples = samples;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn poll(&mut self) -> PlaybackStatus {
        if self.position() < self.samples.len() {
            return PlaybackStatus::Playing;
        }
        if !self.written {
            if let Err(e) = write_wav(&self.path, &self.samples, self.sample_rate) {
                return PlaybackStatus::Failed(e.to_string());
            }
            self.written = true;
            tracing::info!("Wrote {} samples to {}", self.samples.len(), self.path.display());
        }
        PlaybackStatus::Finished
    }

    fn position(&self) -> usize {
        self.started
            .map_or(0, |started| samples_since(started, self.sample_rate).min(self.samples.len()))
    }

    fn stop(&mut self) {
        self.started = None;
    }
}

struct WavInput {
    samples: Vec<f32>,
    sample_rate: u32,
    cursor: usize,
    started: Instant,
}

impl AudioInput for WavInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut Vec<f32>) -> Result<usize, PlatformError> {
        let due = samples_since(self.started, self.sample_rate);
        if due <= self.cursor {
            return Ok(0);
        }
        let available = self.samples.len().min(due);
        if self.cursor < available {
            buf.extend_from_slice(&self.samples[self.cursor..available]);
        }
        // Past the end of the recording the room is silent
        buf.resize(buf.len() + (due - self.cursor.max(available)), 0.0);
        let read = due - self.cursor;
        self.cursor = due;
        Ok(read)
    }

    fn close(&mut self) {
        self.samples.clear();
    }
}

/// Claims are accepted and logged; external pages are printed.
pub struct ConsoleBridge;

impl HostBridge for ConsoleBridge {
    fn claim(&mut self, token_id: &str) -> Result<(), ClaimError> {
        tracing::info!("Claimed token {}", token_id);
        Ok(())
    }

    fn open_external(&mut self, url: &Url) {
        println!("{}", url);
    }
}
