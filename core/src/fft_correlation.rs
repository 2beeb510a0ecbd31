//! FFT-based cross-correlation against a fixed template
//!
//! Output modes follow the scipy.signal.correlate conventions:
//!
//! - **Full**: length `N + M - 1`; index `k` is the lag where `template[M-1]`
//!   aligns with `signal[k]`.
//! - **Valid**: length `N - M + 1` (empty if `M > N`); index `i` is the window
//!   starting at `signal[i]`.
//!
//! The template spectrum is cached per FFT size, so correlating a stream of
//! similarly sized buffers only transforms the signal.

use crate::error::{AudioModemError, Result};
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Complete correlation (signal.len() + template.len() - 1 samples)
    Full,
    /// Only fully-overlapping windows (signal.len() - template.len() + 1 samples)
    Valid,
}

pub struct Correlator {
    template: Vec<f32>,
    template_energy: f32,
    planner: RealFftPlanner<f32>,
    cached_spectrum: Option<(usize, Vec<Complex<f32>>)>,
}

impl Correlator {
    pub fn new(template: Vec<f32>) -> Self {
        let template_energy = template.iter().map(|x| x * x).sum();
        Self {
            template,
            template_energy,
            planner: RealFftPlanner::new(),
            cached_spectrum: None,
        }
    }

    pub fn template_len(&self) -> usize {
        self.template.len()
    }

    /// Raw cross-correlation of `signal` with the template.
    pub fn correlate(&mut self, signal: &[f32], mode: Mode) -> Result<Vec<f32>> {
        if signal.is_empty() || self.template.is_empty() {
            return Ok(Vec::new());
        }
        if mode == Mode::Valid && signal.len() < self.template.len() {
            return Ok(Vec::new());
        }

        let output_len = signal.len() + self.template.len() - 1;
        let fft_size = output_len.next_power_of_two();
        self.prepare_template(fft_size)?;

        let r2c = self.planner.plan_fft_forward(fft_size);
        let c2r = self.planner.plan_fft_inverse(fft_size);

        let mut padded_signal = vec![0.0; fft_size];
        padded_signal[..signal.len()].copy_from_slice(signal);
        let mut spectrum = r2c.make_output_vec();
        r2c.process(&mut padded_signal, &mut spectrum)
            .map_err(|e| AudioModemError::FftError(format!("forward FFT failed: {:?}", e)))?;

        if let Some((_, template_spectrum)) = &self.cached_spectrum {
            for (bin, t) in spectrum.iter_mut().zip(template_spectrum) {
                *bin *= *t;
            }
        }

        let mut result = vec![0.0; fft_size];
        c2r.process(&mut spectrum, &mut result)
            .map_err(|e| AudioModemError::FftError(format!("inverse FFT failed: {:?}", e)))?;

        let normalization = fft_size as f32;
        result.iter_mut().for_each(|x| *x /= normalization);

        match mode {
            Mode::Full => {
                result.truncate(output_len);
                Ok(result)
            }
            Mode::Valid => {
                let start = self.template.len() - 1;
                let valid_len = signal.len() - self.template.len() + 1;
                Ok(result[start..start + valid_len].to_vec())
            }
        }
    }

    /// Normalized correlation coefficient for every fully-overlapping window,
    /// in [-1, 1]. Silent windows score 0.
    pub fn normalized(&mut self, signal: &[f32]) -> Result<Vec<f32>> {
        let raw = self.correlate(signal, Mode::Valid)?;
        let window = self.template.len();

        // Prefix sums of squared samples give each window energy in O(1)
        let mut sq_prefix = vec![0.0f64; signal.len() + 1];
        for (k, &x) in signal.iter().enumerate() {
            sq_prefix[k + 1] = sq_prefix[k] + (x as f64) * (x as f64);
        }

        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let window_energy = (sq_prefix[i + window] - sq_prefix[i]) as f32;
                let denom = (window_energy.max(0.0) * self.template_energy).sqrt();
                if denom > 1e-10 {
                    value / denom
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn prepare_template(&mut self, fft_size: usize) -> Result<()> {
        if matches!(&self.cached_spectrum, Some((size, _)) if *size == fft_size) {
            return Ok(());
        }

        // Time-reversed template turns the spectral product into a correlation
        let mut padded = vec![0.0; fft_size];
        for (i, &val) in self.template.iter().rev().enumerate() {
            padded[i] = val;
        }

        let r2c = self.planner.plan_fft_forward(fft_size);
        let mut spectrum = r2c.make_output_vec();
        r2c.process(&mut padded, &mut spectrum)
            .map_err(|e| AudioModemError::FftError(format!("template FFT failed: {:?}", e)))?;
        self.cached_spectrum = Some((fft_size, spectrum));
        Ok(())
    }
}
