use crate::error::Result;
use crate::fec::outer_encode;
use crate::framing::FrameEncoder;
use crate::fsk::{raised_cosine_ramp, FskModulator, PhaseAccumulator};
use crate::payload::TransferPayload;
use crate::profile::ModemProfile;
use crate::resample::resample;
use crate::sync::write_preamble;
use crate::trellis::inner_encode;
use crate::{LEAD_SAMPLES, MODEM_SAMPLE_RATE};

/// One-pole DC blocker: y[n] = x[n] - x[n-1] + (1 - alpha) * y[n-1]
fn dc_block(samples: &mut [f32], alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let pole = 1.0 - alpha;
    let mut prev_in = 0.0f32;
    let mut prev_out = 0.0f32;
    for sample in samples.iter_mut() {
        let out = *sample - prev_in + pole * prev_out;
        prev_in = *sample;
        prev_out = out;
        *sample = out;
    }
}

pub struct Encoder {
    profile: ModemProfile,
    framer: FrameEncoder,
    modulator: FskModulator,
}

impl Encoder {
    pub fn new(profile: &ModemProfile) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            profile: profile.clone(),
            framer: FrameEncoder::new(profile.frame_length, profile.checksum_scheme),
            modulator: FskModulator::new(profile),
        })
    }

    pub fn profile(&self) -> &ModemProfile {
        &self.profile
    }

    /// Encode payload bytes into one burst at the modem sample rate:
    /// lead silence + preamble + data symbols + ramped tail
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<f32>> {
        let frame = self.framer.encode(payload)?;
        Ok(self.modulate_frame(&frame))
    }

    /// Encode a payload in the profile's wire format.
    pub fn encode_payload(&self, payload: &TransferPayload) -> Result<Vec<f32>> {
        let bytes = payload.encode(self.profile.payload_format)?;
        self.encode(&bytes)
    }

    /// Encode and convert to an output device rate.
    pub fn encode_at_rate(&self, payload: &[u8], sample_rate: u32) -> Result<Vec<f32>> {
        let burst = self.encode(payload)?;
        resample(&burst, MODEM_SAMPLE_RATE, sample_rate, &self.profile.resampler)
    }

    /// Apply FEC and modulation to an already framed byte buffer.
    pub fn modulate_frame(&self, frame: &[u8]) -> Vec<f32> {
        let outer = outer_encode(frame, self.profile.outer_fec_scheme);
        let bits = inner_encode(&outer, self.profile.inner_fec_scheme);

        let mut phase = PhaseAccumulator::new(MODEM_SAMPLE_RATE);
        let mut samples = vec![0.0; LEAD_SAMPLES];
        samples.extend(write_preamble(&mut phase, &self.profile));
        samples.extend(self.modulator.modulate(&mut phase, &bits));

        // Hold the last tone while fading out
        let tail_len = self.profile.tail_samples();
        let final_freq = self.modulator.final_frequency(&bits);
        let fade = raised_cosine_ramp(tail_len);
        for gain in fade.iter().rev() {
            samples.push(phase.next_sample(final_freq) * gain);
        }

        let gain = self.profile.modulation.gain;
        samples.iter_mut().for_each(|s| *s *= gain);
        dc_block(&mut samples, self.profile.encoder_filters.dc_filter_alpha);

        log::debug!(
            "encoded {} frame bytes into {} samples ({:.0} ms)",
            frame.len(),
            samples.len(),
            samples.len() as f32 * 1000.0 / MODEM_SAMPLE_RATE as f32
        );
        samples
    }
}
