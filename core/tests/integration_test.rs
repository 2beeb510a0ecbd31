// ============================================================================
// INTEGRATION TESTS - PERFORMANCE NOTE
// ============================================================================
// These tests run full encode/decode round trips through preamble search,
// soft demodulation and Viterbi decoding. They are quick in release mode:
//   cargo test -p sonicpay-core --test integration_test --release
// ============================================================================

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use sonicpay_core::framing::FrameEncoder;
use sonicpay_core::receiver::{FrameSync, StreamDecoder};
use sonicpay_core::sync::PreambleDetector;
use sonicpay_core::{
    AudioModemError, DecodeError, Decoder, Encoder, ModemProfile, TransferPayload, LEAD_SAMPLES,
};

fn profiles() -> Vec<(&'static str, ModemProfile)> {
    vec![
        ("default", ModemProfile::default_profile()),
        ("ultrasonic15", ModemProfile::ultrasonic15()),
        ("robust", ModemProfile::robust()),
    ]
}

fn payload(token: &str, amount: Decimal) -> TransferPayload {
    let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
    TransferPayload::with_timestamp(token, amount, ts).unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn add_noise(samples: &mut [f32], std_dev: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, std_dev).unwrap();
    for sample in samples.iter_mut() {
        *sample += normal.sample(&mut rng);
    }
}

#[test]
fn test_payload_round_trip_every_profile() {
    for (name, profile) in profiles() {
        let encoder = Encoder::new(&profile).unwrap();
        let mut decoder = Decoder::new(&profile).unwrap();
        let original = payload("abc123", Decimal::new(50, 0));

        let samples = encoder.encode_payload(&original).unwrap();
        assert_eq!(samples.len(), profile.burst_samples(), "{}: burst length", name);

        let decoded = decoder.decode_payload(&samples, 48000).unwrap();
        assert_eq!(decoded, original, "{}: payload mismatch", name);
    }
}

#[test]
fn test_binary_round_trip() {
    let profile = ModemProfile::default_profile();
    let encoder = Encoder::new(&profile).unwrap();
    let mut decoder = Decoder::new(&profile).unwrap();

    let data: Vec<u8> = (0..profile.frame_length as u16).map(|i| (i * 37 % 256) as u8).collect();
    let samples = encoder.encode(&data).unwrap();
    assert_eq!(decoder.decode(&samples).unwrap(), data);

    let samples = encoder.encode(&[]).unwrap();
    assert!(decoder.decode(&samples).unwrap().is_empty());
}

#[test]
fn test_oversized_payload_rejected() {
    let profile = ModemProfile::ultrasonic15();
    let encoder = Encoder::new(&profile).unwrap();
    let result = encoder.encode(&vec![7u8; profile.frame_length + 1]);
    assert!(matches!(result, Err(AudioModemError::PayloadTooLarge { .. })));
}

// ============================================================================
// Robustness: silence, noise and sample-rate conversion
// ============================================================================

#[test]
fn test_decode_with_silence_padding() {
    let profile = ModemProfile::default_profile();
    let encoder = Encoder::new(&profile).unwrap();
    let burst = encoder.encode(b"padded").unwrap();

    let mut samples = vec![0.0; 4000];
    samples.extend_from_slice(&burst);
    samples.extend(vec![0.0; 4000]);

    let mut detector = PreambleDetector::new(&profile);
    let found = detector.detect(&samples).unwrap().expect("preamble not found");
    assert!(
        found.position.abs_diff(4000 + LEAD_SAMPLES) <= 2,
        "preamble at {}, expected {}",
        found.position,
        4000 + LEAD_SAMPLES
    );

    let mut decoder = Decoder::new(&profile).unwrap();
    assert_eq!(decoder.decode(&samples).unwrap(), b"padded");
}

#[test]
fn test_decode_with_gaussian_noise() {
    init_logging();
    for (name, profile) in profiles() {
        let encoder = Encoder::new(&profile).unwrap();
        let mut decoder = Decoder::new(&profile).unwrap();
        let original = payload("noisy", Decimal::new(1250, 2));

        let mut samples = vec![0.0; 3000];
        samples.extend(encoder.encode_payload(&original).unwrap());
        samples.extend(vec![0.0; 3000]);
        add_noise(&mut samples, 0.02, 42);

        let decoded = decoder.decode_payload(&samples, 48000).unwrap();
        assert_eq!(decoded, original, "{}: payload mismatch under noise", name);
    }
}

#[test]
fn test_noise_only_finds_nothing() {
    let profile = ModemProfile::default_profile();
    let mut samples = vec![0.0; 48000];
    add_noise(&mut samples, 0.05, 7);

    let mut decoder = Decoder::new(&profile).unwrap();
    assert!(matches!(
        decoder.decode(&samples),
        Err(AudioModemError::PreambleNotFound)
    ));

    let mut sync = FrameSync::new(&profile).unwrap();
    assert!(sync.push(&samples).is_empty());
}

#[test]
fn test_device_rate_44100_round_trip() {
    let profile = ModemProfile::default_profile();
    let encoder = Encoder::new(&profile).unwrap();
    let mut decoder = Decoder::new(&profile).unwrap();
    let original = payload("cd-quality", Decimal::new(9, 1));

    let bytes = original.encode(profile.payload_format).unwrap();
    let mut samples = encoder.encode_at_rate(&bytes, 44100).unwrap();
    samples.extend(vec![0.0; 4410]);

    assert_eq!(decoder.decode_payload(&samples, 44100).unwrap(), original);
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn test_corrupted_frame_fails_checksum() {
    let profile = ModemProfile::default_profile();
    let encoder = Encoder::new(&profile).unwrap();
    let framer = FrameEncoder::new(profile.frame_length, profile.checksum_scheme);

    let frame = framer.encode(b"integrity").unwrap();
    for byte in [0usize, 5, frame.len() - 1] {
        let mut corrupted = frame.clone();
        corrupted[byte] ^= 0x10;
        let samples = encoder.modulate_frame(&corrupted);
        let mut decoder = Decoder::new(&profile).unwrap();
        assert!(
            matches!(
                decoder.decode(&samples),
                Err(AudioModemError::Decode(DecodeError::ChecksumFailed))
            ),
            "byte {} corruption was not rejected",
            byte
        );
    }
}

#[test]
fn test_malformed_payload_is_distinct_from_checksum_failure() {
    let profile = ModemProfile::default_profile();
    let encoder = Encoder::new(&profile).unwrap();
    let mut decoder = Decoder::new(&profile).unwrap();

    let samples = encoder.encode(b"not json").unwrap();
    assert!(matches!(
        decoder.decode_payload(&samples, 48000),
        Err(AudioModemError::Decode(DecodeError::MalformedPayload(_)))
    ));
}

// ============================================================================
// Streaming receive
// ============================================================================

#[test]
fn test_stream_reports_each_frame_once_in_order() {
    init_logging();
    let profile = ModemProfile::ultrasonic15();
    let encoder = Encoder::new(&profile).unwrap();
    let tokens = ["one", "two", "three"];

    let mut samples = vec![0.0; 1500];
    for token in tokens {
        samples.extend(encoder.encode_payload(&payload(token, Decimal::ONE)).unwrap());
        samples.extend(vec![0.0; 2500]);
    }
    add_noise(&mut samples, 0.01, 99);

    let mut stream = StreamDecoder::new(&profile, 48000).unwrap();
    let mut received = Vec::new();
    for chunk in samples.chunks(777) {
        received.extend(stream.push(chunk).unwrap());
    }
    received.extend(stream.finish().unwrap());

    let ids: Vec<&str> = received.iter().map(|p| p.token_id()).collect();
    assert_eq!(ids, tokens);
}
