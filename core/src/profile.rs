//! Modem profiles and the process-wide profile table
//!
//! A profile fixes every parameter both ends must agree on: modulation,
//! checksum, FEC, frame length, carrier, gain, pulse shaping and resampling.
//! The field names follow the JSON profile format used by the web client, so
//! a profile file can be shared between the browser build and the CLI.

use crate::error::{AudioModemError, Result};
use crate::payload::PayloadFormat;
use crate::{FRAME_HEADER_SIZE, LEAD_SAMPLES, MAX_FRAME_LENGTH, MODEM_SAMPLE_RATE, PREAMBLE_SAMPLES};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationScheme {
    /// Binary continuous-phase FSK
    #[serde(alias = "gmsk")]
    Fsk2,
    /// 4-ary continuous-phase FSK, Gray mapped
    Fsk4,
}

impl ModulationScheme {
    pub fn bits_per_symbol(&self) -> usize {
        match self {
            ModulationScheme::Fsk2 => 1,
            ModulationScheme::Fsk4 => 2,
        }
    }

    pub fn tone_count(&self) -> usize {
        1 << self.bits_per_symbol()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumScheme {
    Crc8,
    Crc16,
    Crc32,
}

impl ChecksumScheme {
    pub fn size_bytes(&self) -> usize {
        match self {
            ChecksumScheme::Crc8 => 1,
            ChecksumScheme::Crc16 => 2,
            ChecksumScheme::Crc32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InnerFecScheme {
    None,
    /// Convolutional code, rate 1/2, constraint length 7
    V27,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OuterFecScheme {
    None,
    /// Reed-Solomon over GF(256), 32 parity bytes per 223-byte block
    Rs8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseShape {
    /// Hard tone switch at symbol boundaries
    Rect,
    /// Raised-cosine frequency transition spanning the boundary
    #[serde(alias = "rrcos")]
    Rcos,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarrierParams {
    pub center_frequency: f32,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseShaping {
    pub shape: PulseShape,
    pub samples_per_symbol: usize,
    /// Symbols of tail during which the burst ramps down to silence
    pub symbol_delay: usize,
    /// Fraction of a symbol spent moving between tones
    pub excess_bandwidth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderFilters {
    pub dc_filter_alpha: f32,
}

impl Default for EncoderFilters {
    fn default() -> Self {
        Self { dc_filter_alpha: 0.01 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResamplerParams {
    /// Kernel half length; the sinc kernel spans `8 * delay` input samples
    pub delay: usize,
    /// Passband edge as a fraction of the lower of the two sample rates
    pub bandwidth: f32,
    /// Stopband attenuation in dB, picks the kernel window
    pub attenuation: f32,
    /// Kernel table oversampling: fractional phases per input sample
    pub filter_bank_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemProfile {
    pub mod_scheme: ModulationScheme,
    pub checksum_scheme: ChecksumScheme,
    pub inner_fec_scheme: InnerFecScheme,
    pub outer_fec_scheme: OuterFecScheme,
    pub frame_length: usize,
    pub modulation: CarrierParams,
    pub interpolation: PulseShaping,
    #[serde(default)]
    pub encoder_filters: EncoderFilters,
    pub resampler: ResamplerParams,
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

impl ModemProfile {
    /// 4-FSK at 15 kHz carrying the JSON payload in a single 96-byte frame.
    pub fn default_profile() -> Self {
        Self {
            mod_scheme: ModulationScheme::Fsk4,
            checksum_scheme: ChecksumScheme::Crc32,
            inner_fec_scheme: InnerFecScheme::V27,
            outer_fec_scheme: OuterFecScheme::None,
            frame_length: 96,
            modulation: CarrierParams {
                center_frequency: 15000.0,
                gain: 0.2,
            },
            interpolation: PulseShaping {
                shape: PulseShape::Rcos,
                samples_per_symbol: 48,
                symbol_delay: 4,
                excess_bandwidth: 0.35,
            },
            encoder_filters: EncoderFilters::default(),
            resampler: ResamplerParams {
                delay: 13,
                bandwidth: 0.45,
                attenuation: 60.0,
                filter_bank_size: 64,
            },
            payload_format: PayloadFormat::Json,
        }
    }

    /// Short 34-byte frames with the compact payload, for quick handoffs.
    pub fn ultrasonic15() -> Self {
        Self {
            mod_scheme: ModulationScheme::Fsk2,
            frame_length: 34,
            interpolation: PulseShaping {
                shape: PulseShape::Rcos,
                samples_per_symbol: 32,
                symbol_delay: 4,
                excess_bandwidth: 0.35,
            },
            payload_format: PayloadFormat::Compact,
            ..Self::default_profile()
        }
    }

    /// Slow 2-FSK with the Reed-Solomon outer code, for noisy rooms.
    pub fn robust() -> Self {
        Self {
            mod_scheme: ModulationScheme::Fsk2,
            outer_fec_scheme: OuterFecScheme::Rs8,
            frame_length: 64,
            interpolation: PulseShaping {
                shape: PulseShape::Rcos,
                samples_per_symbol: 96,
                symbol_delay: 2,
                excess_bandwidth: 0.35,
            },
            ..Self::default_profile()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(json)
            .map_err(|e| AudioModemError::InvalidProfile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let nyquist = MODEM_SAMPLE_RATE as f32 / 2.0;
        let shaping = &self.interpolation;

        if self.frame_length == 0 || self.frame_length > MAX_FRAME_LENGTH {
            return Err(invalid(format!(
                "frame_length must be in 1..={}, got {}",
                MAX_FRAME_LENGTH, self.frame_length
            )));
        }
        if !(self.modulation.gain > 0.0 && self.modulation.gain <= 1.0) {
            return Err(invalid(format!("gain must be in (0, 1], got {}", self.modulation.gain)));
        }
        if !(0.0..=1.0).contains(&shaping.excess_bandwidth) {
            return Err(invalid(format!(
                "excess_bandwidth must be in [0, 1], got {}",
                shaping.excess_bandwidth
            )));
        }
        if shaping.samples_per_symbol < 4 || self.detection_window() < 4 {
            return Err(invalid(format!(
                "samples_per_symbol {} leaves no detection window",
                shaping.samples_per_symbol
            )));
        }
        let preamble_low = self.modulation.center_frequency - crate::PREAMBLE_BANDWIDTH / 2.0;
        let preamble_high = self.modulation.center_frequency + crate::PREAMBLE_BANDWIDTH / 2.0;
        let tones = self.tone_frequencies();
        let lowest = tones.iter().copied().fold(preamble_low, f32::min);
        let highest = tones.iter().copied().fold(preamble_high, f32::max);
        if lowest <= 0.0 || highest >= nyquist {
            return Err(invalid(format!(
                "signal spans {:.0}-{:.0} Hz, outside (0, {:.0}) Hz",
                lowest, highest, nyquist
            )));
        }
        if !(0.0..1.0).contains(&self.encoder_filters.dc_filter_alpha) {
            return Err(invalid("dc_filter_alpha must be in [0, 1)".to_string()));
        }
        let resampler = &self.resampler;
        if resampler.delay == 0 || resampler.filter_bank_size == 0 {
            return Err(invalid("resampler delay and filter_bank_size must be non-zero".to_string()));
        }
        if !(resampler.bandwidth > 0.0 && resampler.bandwidth < 0.5) {
            return Err(invalid(format!(
                "resampler bandwidth must be in (0, 0.5), got {}",
                resampler.bandwidth
            )));
        }
        Ok(())
    }

    /// Samples on each side of a symbol boundary spent moving between tones.
    pub fn transition_half(&self) -> usize {
        match self.interpolation.shape {
            PulseShape::Rect => 0,
            PulseShape::Rcos => {
                let half = self.interpolation.excess_bandwidth
                    * self.interpolation.samples_per_symbol as f32
                    / 2.0;
                half.round() as usize
            }
        }
    }

    /// Steady-tone span of each symbol used for energy detection.
    pub fn detection_window(&self) -> usize {
        self.interpolation
            .samples_per_symbol
            .saturating_sub(2 * self.transition_half())
    }

    /// Tone spacing that keeps tones orthogonal over the detection window.
    pub fn tone_spacing(&self) -> f32 {
        MODEM_SAMPLE_RATE as f32 / self.detection_window().max(1) as f32
    }

    /// Tone frequencies, lowest first, symmetric around the carrier.
    pub fn tone_frequencies(&self) -> Vec<f32> {
        let count = self.mod_scheme.tone_count();
        let spacing = self.tone_spacing();
        let middle = (count as f32 - 1.0) / 2.0;
        (0..count)
            .map(|i| self.modulation.center_frequency + (i as f32 - middle) * spacing)
            .collect()
    }

    /// Bytes in one frame: header, padded body, checksum.
    pub fn frame_bytes(&self) -> usize {
        FRAME_HEADER_SIZE + self.frame_length + self.checksum_scheme.size_bytes()
    }

    /// Bytes after the outer code.
    pub fn outer_coded_bytes(&self) -> usize {
        crate::fec::outer_encoded_len(self.outer_fec_scheme, self.frame_bytes())
    }

    /// Channel bits after both codes.
    pub fn coded_bits(&self) -> usize {
        crate::trellis::inner_encoded_bits(self.inner_fec_scheme, self.outer_coded_bytes())
    }

    pub fn symbol_count(&self) -> usize {
        let bits_per_symbol = self.mod_scheme.bits_per_symbol();
        (self.coded_bits() + bits_per_symbol - 1) / bits_per_symbol
    }

    pub fn data_samples(&self) -> usize {
        self.symbol_count() * self.interpolation.samples_per_symbol
    }

    /// Samples from the first preamble sample to the end of the last data symbol.
    pub fn frame_samples(&self) -> usize {
        PREAMBLE_SAMPLES + self.data_samples()
    }

    pub fn tail_samples(&self) -> usize {
        self.interpolation.symbol_delay * self.interpolation.samples_per_symbol
    }

    /// Full burst length at the modem rate, lead-in and tail included.
    pub fn burst_samples(&self) -> usize {
        LEAD_SAMPLES + self.frame_samples() + self.tail_samples()
    }

    pub fn airtime(&self) -> Duration {
        Duration::from_secs_f64(self.burst_samples() as f64 / MODEM_SAMPLE_RATE as f64)
    }
}

fn invalid(reason: String) -> AudioModemError {
    AudioModemError::InvalidProfile(reason)
}

type ProfileTable = RwLock<HashMap<String, Arc<ModemProfile>>>;

fn table() -> &'static ProfileTable {
    static TABLE: OnceLock<ProfileTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), Arc::new(ModemProfile::default_profile()));
        profiles.insert("ultrasonic15".to_string(), Arc::new(ModemProfile::ultrasonic15()));
        profiles.insert("robust".to_string(), Arc::new(ModemProfile::robust()));
        RwLock::new(profiles)
    })
}

/// Register a profile under `name`. Registering an existing name replaces it.
pub fn register_profile(name: &str, profile: ModemProfile) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid("profile name is empty".to_string()));
    }
    profile.validate()?;
    log::debug!(
        "registering modem profile '{}' ({:?}, {:.0} Hz, {} byte frame)",
        name,
        profile.mod_scheme,
        profile.modulation.center_frequency,
        profile.frame_length
    );
    table().write().insert(name.to_string(), Arc::new(profile));
    Ok(())
}

pub fn lookup_profile(name: &str) -> Option<Arc<ModemProfile>> {
    table().read().get(name).cloned()
}

pub fn require_profile(name: &str) -> Result<Arc<ModemProfile>> {
    lookup_profile(name).ok_or_else(|| AudioModemError::UnknownProfile(name.to_string()))
}

/// Registered profiles, sorted by name.
pub fn registered_profiles() -> Vec<(String, Arc<ModemProfile>)> {
    let mut profiles: Vec<_> = table()
        .read()
        .iter()
        .map(|(name, profile)| (name.clone(), profile.clone()))
        .collect();
    profiles.sort_by(|a, b| a.0.cmp(&b.0));
    profiles
}

/// Register every profile of a `{ "name": { ...profile... } }` JSON document.
/// Nothing is registered unless all of them validate.
pub fn register_profiles_json(json: &str) -> Result<Vec<String>> {
    let parsed: BTreeMap<String, ModemProfile> = serde_json::from_str(json)
        .map_err(|e| AudioModemError::InvalidProfile(e.to_string()))?;
    for profile in parsed.values() {
        profile.validate()?;
    }
    let mut names = Vec::with_capacity(parsed.len());
    for (name, profile) in parsed {
        register_profile(&name, profile)?;
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_JSON: &str = r#"{
        "mod_scheme": "fsk2",
        "checksum_scheme": "crc32",
        "inner_fec_scheme": "v27",
        "outer_fec_scheme": "none",
        "frame_length": 34,
        "modulation": { "center_frequency": 15000, "gain": 0.20 },
        "interpolation": {
            "shape": "rrcos", "samples_per_symbol": 32,
            "symbol_delay": 4, "excess_bandwidth": 0.35
        },
        "encoder_filters": { "dc_filter_alpha": 0.01 },
        "resampler": { "delay": 13, "bandwidth": 0.45, "attenuation": 60, "filter_bank_size": 64 }
    }"#;

    #[test]
    fn test_builtin_profiles_validate() {
        for profile in [
            ModemProfile::default_profile(),
            ModemProfile::ultrasonic15(),
            ModemProfile::robust(),
        ] {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_builtins_are_registered() {
        assert!(lookup_profile("default").is_some());
        assert!(lookup_profile("ultrasonic15").is_some());
        assert!(lookup_profile("robust").is_some());
        assert!(matches!(
            require_profile("no-such-profile"),
            Err(AudioModemError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_parse_web_profile_json() {
        let profile = ModemProfile::from_json(PROFILE_JSON).unwrap();
        assert_eq!(profile.mod_scheme, ModulationScheme::Fsk2);
        assert_eq!(profile.interpolation.shape, PulseShape::Rcos);
        assert_eq!(profile.payload_format, PayloadFormat::Json);
        assert_eq!(profile.frame_length, 34);
    }

    #[test]
    fn test_web_client_gmsk_profile_loads() {
        let json = r#"{
            "mod_scheme": "gmsk",
            "checksum_scheme": "crc32",
            "inner_fec_scheme": "v27",
            "outer_fec_scheme": "none",
            "frame_length": 34,
            "modulation": { "center_frequency": 15000, "gain": 0.20 },
            "interpolation": {
                "shape": "rrcos", "samples_per_symbol": 14,
                "symbol_delay": 4, "excess_bandwidth": 0.35
            },
            "encoder_filters": { "dc_filter_alpha": 0.01 },
            "resampler": { "delay": 13, "bandwidth": 0.45, "attenuation": 60, "filter_bank_size": 64 }
        }"#;
        let profile = ModemProfile::from_json(json).unwrap();
        assert_eq!(profile.mod_scheme, ModulationScheme::Fsk2);
        assert_eq!(profile.interpolation.samples_per_symbol, 14);
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let json = PROFILE_JSON.replace("\"fsk2\"", "\"ofdm\"");
        assert!(matches!(
            ModemProfile::from_json(&json),
            Err(AudioModemError::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_default_tone_plan() {
        let profile = ModemProfile::default_profile();
        assert_eq!(profile.transition_half(), 8);
        assert_eq!(profile.detection_window(), 32);
        let tones = profile.tone_frequencies();
        assert_eq!(tones.len(), 4);
        assert!((tones[0] - 12750.0).abs() < 1e-3);
        assert!((tones[3] - 17250.0).abs() < 1e-3);
    }

    #[test]
    fn test_frame_geometry() {
        let profile = ModemProfile::default_profile();
        assert_eq!(profile.frame_bytes(), 2 + 96 + 4);
        // 102 bytes * 16 coded bits + 12 flush bits
        assert_eq!(profile.coded_bits(), 102 * 16 + 12);
        assert_eq!(profile.symbol_count(), (102 * 16 + 12) / 2);
        assert_eq!(
            profile.frame_samples(),
            PREAMBLE_SAMPLES + profile.symbol_count() * 48
        );
    }

    #[test]
    fn test_robust_frame_geometry() {
        let profile = ModemProfile::robust();
        assert_eq!(profile.frame_bytes(), 2 + 64 + 4);
        // one shortened RS block: 70 data bytes + 32 parity bytes
        assert_eq!(profile.outer_coded_bytes(), 70 + 32);
        assert_eq!(profile.coded_bits(), 102 * 16 + 12);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut profile = ModemProfile::default_profile();
        profile.modulation.gain = 1.5;
        assert!(profile.validate().is_err());

        let mut profile = ModemProfile::default_profile();
        profile.modulation.center_frequency = 23000.0;
        assert!(profile.validate().is_err());

        let mut profile = ModemProfile::default_profile();
        profile.frame_length = 0;
        assert!(profile.validate().is_err());

        let mut profile = ModemProfile::default_profile();
        profile.interpolation.samples_per_symbol = 2;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_reregistration_last_write_wins() {
        let name = "profile-test-reregister";
        register_profile(name, ModemProfile::default_profile()).unwrap();
        register_profile(name, ModemProfile::default_profile()).unwrap();
        register_profile(name, ModemProfile::robust()).unwrap();
        assert_eq!(*lookup_profile(name).unwrap(), ModemProfile::robust());
    }

    #[test]
    fn test_register_profiles_json_is_all_or_nothing() {
        let bad = PROFILE_JSON.replace("0.20", "2.0");
        let doc = format!(
            r#"{{ "profile-test-good": {}, "profile-test-bad": {} }}"#,
            PROFILE_JSON, bad
        );
        assert!(register_profiles_json(&doc).is_err());
        assert!(lookup_profile("profile-test-good").is_none());

        let doc = format!(r#"{{ "profile-test-json": {} }}"#, PROFILE_JSON);
        let names = register_profiles_json(&doc).unwrap();
        assert_eq!(names, vec!["profile-test-json".to_string()]);
        assert!(lookup_profile("profile-test-json").is_some());
    }
}
