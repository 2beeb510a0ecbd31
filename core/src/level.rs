//! Activity level for UI meters
//!
//! Mirrors what a Web Audio `AnalyserNode` reports through
//! `getByteFrequencyData`: a Blackman-windowed 32-point spectrum, smoothed
//! over time, mapped from -100..-30 dB onto 0..255. The level is the mean
//! byte value scaled to [0, 1].

use crate::fsk::goertzel_power;
use std::f32::consts::PI;

pub const LEVEL_FFT_SIZE: usize = 32;
const LEVEL_SMOOTHING: f32 = 0.8;
const LEVEL_MIN_DB: f32 = -100.0;
const LEVEL_MAX_DB: f32 = -30.0;

/// Anything with a recent audio window to meter: a playing transmitter or a
/// listening receiver.
pub trait LevelSource {
    /// The most recent `len` samples, zero padded at the front when fewer exist.
    fn level_window(&self, len: usize) -> Vec<f32>;
}

/// Mean of analyser bytes, scaled to [0, 1].
pub fn level_from_bytes(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    sum as f32 / bytes.len() as f32 / 255.0
}

fn blackman(n: usize, len: usize) -> f32 {
    let a0 = 0.42;
    let a1 = 0.5;
    let a2 = 0.08;
    let x = n as f32 / len as f32;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

pub struct LevelMonitor {
    active: bool,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    level: f32,
}

impl Default for LevelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self {
            active: false,
            window: (0..LEVEL_FFT_SIZE).map(|n| blackman(n, LEVEL_FFT_SIZE)).collect(),
            smoothed: vec![0.0; LEVEL_FFT_SIZE / 2],
            level: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
        self.smoothed.fill(0.0);
        self.level = 0.0;
    }

    /// Stop sampling and drop the level to zero.
    pub fn stop(&mut self) {
        self.active = false;
        self.smoothed.fill(0.0);
        self.level = 0.0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Take one reading from `source`. Inactive monitors always read zero.
    pub fn sample(&mut self, source: &dyn LevelSource) -> f32 {
        if !self.active {
            return 0.0;
        }
        let samples = source.level_window(LEVEL_FFT_SIZE);
        let bytes = self.byte_frequency_data(&samples);
        self.level = level_from_bytes(&bytes);
        self.level
    }

    /// Smoothed spectrum of the last `LEVEL_FFT_SIZE` samples as analyser bytes.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let mut frame = vec![0.0f32; LEVEL_FFT_SIZE];
        let take = samples.len().min(LEVEL_FFT_SIZE);
        frame[LEVEL_FFT_SIZE - take..].copy_from_slice(&samples[samples.len() - take..]);
        for (sample, w) in frame.iter_mut().zip(&self.window) {
            *sample *= w;
        }

        let scale = 255.0 / (LEVEL_MAX_DB - LEVEL_MIN_DB);
        self.smoothed
            .iter_mut()
            .enumerate()
            .map(|(bin, smoothed)| {
                let power = goertzel_power(&frame, bin as f32, LEVEL_FFT_SIZE as f32);
                let magnitude = power.sqrt() / LEVEL_FFT_SIZE as f32;
                *smoothed = LEVEL_SMOOTHING * *smoothed + (1.0 - LEVEL_SMOOTHING) * magnitude;

                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (scale * (db - LEVEL_MIN_DB)).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}
