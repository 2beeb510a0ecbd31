use crate::error::{AudioModemError, Result};
use crate::fec::outer_decode;
use crate::framing::FrameDecoder;
use crate::fsk::FskDemodulator;
use crate::payload::TransferPayload;
use crate::profile::ModemProfile;
use crate::resample::resample;
use crate::sync::PreambleDetector;
use crate::trellis::inner_decode;
use crate::{MODEM_SAMPLE_RATE, PREAMBLE_SAMPLES};

pub struct Decoder {
    profile: ModemProfile,
    detector: PreambleDetector,
    demodulator: FskDemodulator,
    framer: FrameDecoder,
}

impl Decoder {
    pub fn new(profile: &ModemProfile) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            profile: profile.clone(),
            detector: PreambleDetector::new(profile),
            demodulator: FskDemodulator::new(profile),
            framer: FrameDecoder::new(profile.frame_length, profile.checksum_scheme),
        })
    }

    pub fn profile(&self) -> &ModemProfile {
        &self.profile
    }

    pub(crate) fn detector_mut(&mut self) -> &mut PreambleDetector {
        &mut self.detector
    }

    /// Decode one frame whose preamble starts at `frame[0]`.
    /// Checksum failures surface as `AudioModemError::Decode`.
    pub fn decode_aligned(&self, frame: &[f32]) -> Result<Vec<u8>> {
        let data_end = self.profile.frame_samples();
        if frame.len() < data_end {
            return Err(AudioModemError::InsufficientData);
        }

        let soft = self
            .demodulator
            .demodulate_soft(&frame[PREAMBLE_SAMPLES..data_end], self.profile.symbol_count())?;
        let outer = inner_decode(&soft, self.profile.inner_fec_scheme, self.profile.outer_coded_bytes())?;
        let frame_bytes = outer_decode(&outer, self.profile.outer_fec_scheme, self.profile.frame_bytes())?;

        Ok(self.framer.decode(&frame_bytes)?)
    }

    /// Find the first preamble in a recording at the modem rate and decode
    /// the frame behind it.
    pub fn decode(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        if samples.len() < self.profile.frame_samples() {
            return Err(AudioModemError::InsufficientData);
        }

        let found = self
            .detector
            .detect(samples)?
            .ok_or(AudioModemError::PreambleNotFound)?;
        log::debug!("preamble at sample {} (score {:.2})", found.position, found.score);

        self.decode_aligned(&samples[found.position..])
    }

    /// Decode a recording captured at `sample_rate`.
    pub fn decode_at_rate(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
        let converted = resample(samples, sample_rate, MODEM_SAMPLE_RATE, &self.profile.resampler)?;
        self.decode(&converted)
    }

    /// Decode a recording and parse it in the profile's wire format.
    pub fn decode_payload(&mut self, samples: &[f32], sample_rate: u32) -> Result<TransferPayload> {
        let bytes = self.decode_at_rate(samples, sample_rate)?;
        Ok(TransferPayload::decode(&bytes, self.profile.payload_format)?)
    }
}
