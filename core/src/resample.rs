//! Sample-rate conversion between the device rate and the modem rate
//!
//! Band-limited sinc interpolation via `rubato`. The profile's resampler
//! block maps onto the sinc parameters: `delay` sets the kernel length,
//! `bandwidth` the cutoff, `attenuation` the window and `filter_bank_size`
//! the oversampling of the kernel table.

use crate::error::{AudioModemError, Result};
use crate::profile::ResamplerParams;
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Average interleaved frames down to a single channel.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Input frames handed to the sinc resampler per call
const CHUNK_FRAMES: usize = 1024;

fn sinc_parameters(params: &ResamplerParams) -> SincInterpolationParameters {
    let window = if params.attenuation > 60.0 {
        WindowFunction::BlackmanHarris2
    } else if params.attenuation >= 45.0 {
        WindowFunction::Blackman
    } else {
        WindowFunction::Hann
    };
    SincInterpolationParameters {
        sinc_len: 8 * params.delay.max(1),
        f_cutoff: (2.0 * params.bandwidth).clamp(0.01, 0.99),
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: params.filter_bank_size.max(1),
        window,
    }
}

fn first_channel(mut channels: Vec<Vec<f32>>) -> Vec<f32> {
    if channels.is_empty() {
        Vec::new()
    } else {
        channels.swap_remove(0)
    }
}

fn resample_error(e: impl std::fmt::Display) -> AudioModemError {
    AudioModemError::InvalidConfig(format!("resampler: {}", e))
}

/// Streaming resampler. Input is buffered into fixed chunks, so the output
/// does not depend on how the caller splits the stream.
pub struct Resampler {
    inner: Option<SincFixedIn<f32>>,
    from_rate: u64,
    to_rate: u64,
    pending: Vec<f32>,
    /// Leading output samples still to drop to undo the filter delay
    skip: usize,
    /// Input samples accepted since the last reset
    consumed: u64,
    /// Output samples returned since the last reset
    emitted: u64,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, params: &ResamplerParams) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(AudioModemError::InvalidConfig(format!(
                "sample rate must be non-zero, got {} Hz -> {} Hz",
                from_rate, to_rate
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let ratio = to_rate as f64 / from_rate as f64;
            let sinc = SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(params), CHUNK_FRAMES, 1)
                .map_err(resample_error)?;
            Some(sinc)
        };

        let mut resampler = Self {
            inner,
            from_rate: from_rate as u64,
            to_rate: to_rate as u64,
            pending: Vec::new(),
            skip: 0,
            consumed: 0,
            emitted: 0,
        };
        resampler.reset();
        Ok(resampler)
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
        self.emitted = 0;
        self.skip = match self.inner.as_mut() {
            Some(inner) => {
                inner.reset();
                inner.output_delay()
            }
            None => 0,
        };
    }

    /// Feed input, returning every output sample the buffered chunks cover.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };
        self.consumed += input.len() as u64;
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        while self.pending.len() >= inner.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..inner.input_frames_next()).collect();
            let channels = inner.process(&[chunk], None).map_err(resample_error)?;
            output.extend(first_channel(channels));
        }
        Ok(self.trim(output))
    }

    /// Emit the remaining output for the input seen so far and reset.
    /// The total output is `ceil(input * to_rate / from_rate)` samples.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        let expected = (self.consumed * self.to_rate).div_ceil(self.from_rate);

        let tail = std::mem::take(&mut self.pending);
        let channels = inner
            .process_partial(Some(&[tail][..]), None)
            .map_err(resample_error)?;
        let mut output = first_channel(channels);
        while self.emitted + (output.len().saturating_sub(self.skip) as u64) < expected {
            let channels = inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(resample_error)?;
            output.extend(first_channel(channels));
        }

        let already = self.emitted;
        let mut output = self.trim(output);
        output.truncate(expected.saturating_sub(already) as usize);
        self.reset();
        Ok(output)
    }

    fn trim(&mut self, mut output: Vec<f32>) -> Vec<f32> {
        let drop = self.skip.min(output.len());
        self.skip -= drop;
        output.drain(..drop);
        self.emitted += output.len() as u64;
        output
    }
}

/// One-shot conversion of a complete buffer.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32, params: &ResamplerParams) -> Result<Vec<f32>> {
    let mut resampler = Resampler::new(from_rate, to_rate, params)?;
    let mut output = resampler.process(samples)?;
    output.extend(resampler.flush()?);
    Ok(output)
}
