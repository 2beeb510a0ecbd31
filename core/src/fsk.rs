use crate::error::{AudioModemError, Result};
use crate::profile::ModemProfile;
use crate::MODEM_SAMPLE_RATE;
use std::f32::consts::PI;

// Continuous-phase FSK around the profile carrier
//
// Tone plan:
// - 2 or 4 tones spaced fs / detection_window apart, centred on the carrier,
//   so tones are orthogonal over the steady part of each symbol
// - Symbol values are Gray mapped onto tones: neighbouring tones differ in one bit
//
// Symbol shape:
// - With the rcos shape the instantaneous frequency moves between tones along
//   a raised cosine spanning `transition_half` samples either side of each
//   boundary; the phase never jumps
// - The demodulator only looks at the steady window in the middle of a symbol

/// Below this total energy a symbol carries no information.
const FSK_MIN_SYMBOL_ENERGY: f32 = 1e-9;

/// Running oscillator phase shared by every part of a burst.
pub struct PhaseAccumulator {
    phase: f64,
    sample_rate: f64,
}

impl PhaseAccumulator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            sample_rate: sample_rate as f64,
        }
    }

    /// Emit the current sample, then advance by one sample at `freq`.
    pub fn next_sample(&mut self, freq: f32) -> f32 {
        let sample = self.phase.sin() as f32;
        self.phase += std::f64::consts::TAU * freq as f64 / self.sample_rate;
        if self.phase > std::f64::consts::TAU {
            self.phase -= std::f64::consts::TAU;
        }
        sample
    }
}

/// Sine-squared ramp from 0 towards 1 over `len` samples.
pub fn raised_cosine_ramp(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let progress = i as f32 / len as f32;
            (PI * progress / 2.0).sin().powi(2)
        })
        .collect()
}

/// Tone index carrying `value` under Gray mapping.
fn tone_for_value(value: usize, tone_count: usize) -> usize {
    (0..tone_count)
        .find(|&tone| value_of_tone(tone) == value)
        .unwrap_or(0)
}

fn value_of_tone(tone: usize) -> usize {
    tone ^ (tone >> 1)
}

/// Energy at an arbitrary frequency (generalized Goertzel)
pub fn goertzel_power(samples: &[f32], freq: f32, sample_rate: f32) -> f32 {
    let omega = 2.0 * PI * freq / sample_rate;
    let coeff = 2.0 * omega.cos();

    let mut q1 = 0.0f32;
    let mut q2 = 0.0f32;
    for &sample in samples {
        let q0 = coeff * q1 - q2 + sample;
        q2 = q1;
        q1 = q0;
    }

    (q1 * q1 + q2 * q2 - coeff * q1 * q2).max(0.0)
}

pub struct FskModulator {
    tones: Vec<f32>,
    bits_per_symbol: usize,
    samples_per_symbol: usize,
    transition_half: usize,
}

impl FskModulator {
    pub fn new(profile: &ModemProfile) -> Self {
        Self {
            tones: profile.tone_frequencies(),
            bits_per_symbol: profile.mod_scheme.bits_per_symbol(),
            samples_per_symbol: profile.interpolation.samples_per_symbol,
            transition_half: profile.transition_half(),
        }
    }

    pub fn symbol_count(&self, bit_count: usize) -> usize {
        (bit_count + self.bits_per_symbol - 1) / self.bits_per_symbol
    }

    /// Map bits (MSB first within a symbol, zero padded) to tone indices.
    pub fn symbols(&self, bits: &[bool]) -> Vec<usize> {
        bits.chunks(self.bits_per_symbol)
            .map(|chunk| {
                let mut value = 0usize;
                for i in 0..self.bits_per_symbol {
                    value = (value << 1) | chunk.get(i).copied().unwrap_or(false) as usize;
                }
                tone_for_value(value, self.tones.len())
            })
            .collect()
    }

    /// Frequency of the last tone sent for `bits`, used to hold the tail.
    pub fn final_frequency(&self, bits: &[bool]) -> f32 {
        self.symbols(bits)
            .last()
            .map(|&tone| self.tones[tone])
            .unwrap_or(self.tones[0])
    }

    /// Modulate `bits` onto the running phase.
    pub fn modulate(&self, phase: &mut PhaseAccumulator, bits: &[bool]) -> Vec<f32> {
        let symbols = self.symbols(bits);
        let sps = self.samples_per_symbol;
        let half = self.transition_half;
        let mut output = Vec::with_capacity(symbols.len() * sps);

        for (k, &tone) in symbols.iter().enumerate() {
            let current = self.tones[tone];
            let previous = k.checked_sub(1).map(|p| self.tones[symbols[p]]);
            let next = symbols.get(k + 1).map(|&n| self.tones[n]);

            for n in 0..sps {
                let freq = match (previous, next) {
                    (Some(prev), _) if n < half => crossfade(prev, current, half + n, half),
                    (_, Some(next)) if n >= sps - half => {
                        crossfade(current, next, n - (sps - half), half)
                    }
                    _ => current,
                };
                output.push(phase.next_sample(freq));
            }
        }

        output
    }
}

/// Instantaneous frequency `pos` samples into a transition of `2 * half` samples.
fn crossfade(from: f32, to: f32, pos: usize, half: usize) -> f32 {
    let progress = (pos as f32 + 0.5) / (2 * half) as f32;
    let weight = 0.5 - 0.5 * (PI * progress).cos();
    from + (to - from) * weight
}

pub struct FskDemodulator {
    tones: Vec<f32>,
    bits_per_symbol: usize,
    samples_per_symbol: usize,
    transition_half: usize,
    window: usize,
}

impl FskDemodulator {
    pub fn new(profile: &ModemProfile) -> Self {
        Self {
            tones: profile.tone_frequencies(),
            bits_per_symbol: profile.mod_scheme.bits_per_symbol(),
            samples_per_symbol: profile.interpolation.samples_per_symbol,
            transition_half: profile.transition_half(),
            window: profile.detection_window(),
        }
    }

    /// Energy of each tone over the steady window of one symbol.
    pub fn tone_energies(&self, symbol: &[f32]) -> Result<Vec<f32>> {
        if symbol.len() != self.samples_per_symbol {
            return Err(AudioModemError::InvalidInputSize);
        }
        let window = &symbol[self.transition_half..self.transition_half + self.window];
        Ok(self
            .tones
            .iter()
            .map(|&freq| goertzel_power(window, freq, MODEM_SAMPLE_RATE as f32))
            .collect())
    }

    /// Soft bits for `symbol_count` symbols: the share of energy in tones
    /// whose value has that bit set (0.5 when the symbol is silent).
    pub fn demodulate_soft(&self, samples: &[f32], symbol_count: usize) -> Result<Vec<f32>> {
        if samples.len() < symbol_count * self.samples_per_symbol {
            return Err(AudioModemError::InsufficientData);
        }

        let mut soft = Vec::with_capacity(symbol_count * self.bits_per_symbol);
        for symbol in samples.chunks_exact(self.samples_per_symbol).take(symbol_count) {
            let energies = self.tone_energies(symbol)?;
            let total: f32 = energies.iter().sum();

            for bit in (0..self.bits_per_symbol).rev() {
                if total < FSK_MIN_SYMBOL_ENERGY {
                    soft.push(0.5);
                    continue;
                }
                let set: f32 = energies
                    .iter()
                    .enumerate()
                    .filter(|(tone, _)| (value_of_tone(*tone) >> bit) & 1 == 1)
                    .map(|(_, &energy)| energy)
                    .sum();
                soft.push(set / total);
            }
        }

        Ok(soft)
    }
}
