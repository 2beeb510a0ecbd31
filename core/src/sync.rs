use crate::error::Result;
use crate::fft_correlation::Correlator;
use crate::fsk::{raised_cosine_ramp, PhaseAccumulator};
use crate::profile::ModemProfile;
use crate::{
    MODEM_SAMPLE_RATE, PREAMBLE_BANDWIDTH, PREAMBLE_SAMPLES, PREAMBLE_TAPER_SAMPLES,
    PREAMBLE_THRESHOLD,
};

/// Samples after the first threshold crossing searched for the true peak.
const PEAK_SEARCH_SAMPLES: usize = 128;

/// Instantaneous frequency of the preamble chirp at sample `n`.
/// Sweeps linearly up across PREAMBLE_BANDWIDTH centred on the carrier.
fn chirp_frequency(center: f32, n: usize) -> f32 {
    let start = center - PREAMBLE_BANDWIDTH / 2.0;
    start + PREAMBLE_BANDWIDTH * n as f32 / PREAMBLE_SAMPLES as f32
}

/// Write the ascending chirp preamble onto the running phase so that the
/// data that follows starts without a phase jump.
pub fn write_preamble(phase: &mut PhaseAccumulator, profile: &ModemProfile) -> Vec<f32> {
    let center = profile.modulation.center_frequency;
    let mut samples: Vec<f32> = (0..PREAMBLE_SAMPLES)
        .map(|n| phase.next_sample(chirp_frequency(center, n)))
        .collect();

    for (sample, gain) in samples.iter_mut().zip(raised_cosine_ramp(PREAMBLE_TAPER_SAMPLES)) {
        *sample *= gain;
    }
    samples
}

/// The preamble exactly as a burst starts it, at unit amplitude.
pub fn generate_preamble(profile: &ModemProfile) -> Vec<f32> {
    let mut phase = PhaseAccumulator::new(MODEM_SAMPLE_RATE);
    write_preamble(&mut phase, profile)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreambleMatch {
    /// Index of the first preamble sample
    pub position: usize,
    /// Normalized correlation at that position
    pub score: f32,
}

/// Matched-filter preamble search for one profile
pub struct PreambleDetector {
    correlator: Correlator,
    threshold: f32,
}

impl PreambleDetector {
    pub fn new(profile: &ModemProfile) -> Self {
        Self {
            correlator: Correlator::new(generate_preamble(profile)),
            threshold: PREAMBLE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Locate the earliest preamble in `samples`: the first window whose
    /// normalized correlation clears the threshold, refined to the local peak.
    pub fn detect(&mut self, samples: &[f32]) -> Result<Option<PreambleMatch>> {
        if samples.len() < self.correlator.template_len() {
            return Ok(None);
        }

        let scores = self.correlator.normalized(samples)?;
        let first = match scores.iter().position(|&s| s >= self.threshold) {
            Some(first) => first,
            None => return Ok(None),
        };

        let end = (first + PEAK_SEARCH_SAMPLES).min(scores.len());
        let (offset, score) = scores[first..end]
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });

        log::trace!("preamble at {} (score {:.3})", first + offset, score);
        Ok(Some(PreambleMatch {
            position: first + offset,
            score,
        }))
    }
}
