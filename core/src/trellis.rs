use crate::error::{AudioModemError, Result};
use crate::profile::InnerFecScheme;

/// Generator polynomials: G1 = 133 (octal), G2 = 171 (octal)
const G1: u8 = 0b1011011;
const G2: u8 = 0b1111001;
const NUM_STATES: usize = 64; // 2^(K-1) where K=7
const TAIL_BITS: usize = 6;

/// Channel bits produced by the inner code for `byte_len` input bytes.
pub fn inner_encoded_bits(scheme: InnerFecScheme, byte_len: usize) -> usize {
    match scheme {
        InnerFecScheme::None => byte_len * 8,
        InnerFecScheme::V27 => (byte_len * 8 + TAIL_BITS) * 2,
    }
}

pub fn inner_encode(data: &[u8], scheme: InnerFecScheme) -> Vec<bool> {
    match scheme {
        InnerFecScheme::None => bytes_to_bits(data),
        InnerFecScheme::V27 => ConvolutionalEncoder::new().encode(data),
    }
}

/// Recover `byte_len` bytes from soft bits (0.0 = certain zero, 1.0 = certain one).
pub fn inner_decode(soft_bits: &[f32], scheme: InnerFecScheme, byte_len: usize) -> Result<Vec<u8>> {
    let expected = inner_encoded_bits(scheme, byte_len);
    if soft_bits.len() < expected {
        return Err(AudioModemError::InsufficientData);
    }
    let soft_bits = &soft_bits[..expected];

    let bits: Vec<bool> = match scheme {
        InnerFecScheme::None => soft_bits.iter().map(|&b| b > 0.5).collect(),
        InnerFecScheme::V27 => ViterbiDecoder::new().decode_soft(soft_bits)?,
    };
    Ok(bits_to_bytes(&bits[..byte_len * 8]))
}

/// Convolutional code rate 1/2 with constraint length 7
///
/// The shift register holds the previous six input bits, newest in bit 5.
pub struct ConvolutionalEncoder {
    state: u8,
}

impl Default for ConvolutionalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvolutionalEncoder {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    /// Encode a single bit, returning the two coded bits
    pub fn encode_bit(&mut self, input: bool) -> [bool; 2] {
        let (out1, out2) = branch_output(self.state, input);
        self.state = next_state(self.state, input);
        [out1, out2]
    }

    /// Encode a message MSB first, then flush the register back to zero
    pub fn encode(&mut self, data: &[u8]) -> Vec<bool> {
        let mut output = Vec::with_capacity(inner_encoded_bits(InnerFecScheme::V27, data.len()));
        for bit in bytes_to_bits(data) {
            output.extend(self.encode_bit(bit));
        }
        for _ in 0..TAIL_BITS {
            output.extend(self.encode_bit(false));
        }
        output
    }

    pub fn reset(&mut self) {
        self.state = 0;
    }
}

/// Soft-decision Viterbi decoder over the 64-state trellis
pub struct ViterbiDecoder {
    metrics: Vec<f32>,
    next_metrics: Vec<f32>,
}

impl Default for ViterbiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ViterbiDecoder {
    pub fn new() -> Self {
        Self {
            metrics: vec![f32::INFINITY; NUM_STATES],
            next_metrics: vec![f32::INFINITY; NUM_STATES],
        }
    }

    /// Decode soft bit pairs. The returned bits include the flush bits.
    pub fn decode_soft(&mut self, soft_bits: &[f32]) -> Result<Vec<bool>> {
        if soft_bits.len() < 2 {
            return Err(AudioModemError::InsufficientData);
        }
        if soft_bits.len() % 2 != 0 {
            return Err(AudioModemError::InvalidInputSize);
        }

        let steps = soft_bits.len() / 2;
        self.metrics.fill(f32::INFINITY);
        self.metrics[0] = 0.0;

        // Bit p of decisions[t] records which predecessor of state p survived
        let mut decisions: Vec<u64> = Vec::with_capacity(steps);

        for pair in soft_bits.chunks_exact(2) {
            let (r1, r2) = (pair[0], pair[1]);
            let mut survivors = 0u64;

            for state in 0..NUM_STATES {
                let input = state >> 5 == 1;
                let mut best = f32::INFINITY;
                let mut best_choice = 0u64;

                for choice in 0..2u8 {
                    let prev = (((state & 0x1F) << 1) as u8) | choice;
                    let prev_metric = self.metrics[prev as usize];
                    if prev_metric == f32::INFINITY {
                        continue;
                    }
                    let (o1, o2) = branch_output(prev, input);
                    let metric = prev_metric + soft_distance(r1, o1) + soft_distance(r2, o2);
                    if metric < best {
                        best = metric;
                        best_choice = choice as u64;
                    }
                }

                self.next_metrics[state] = best;
                survivors |= best_choice << state;
            }

            std::mem::swap(&mut self.metrics, &mut self.next_metrics);
            decisions.push(survivors);
        }

        // Terminated code ends in state 0; fall back to the best state otherwise
        let mut state = if self.metrics[0].is_finite() {
            0usize
        } else {
            self.metrics
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(0)
        };

        let mut bits = vec![false; steps];
        for step in (0..steps).rev() {
            bits[step] = state >> 5 == 1;
            let choice = ((decisions[step] >> state) & 1) as usize;
            state = ((state & 0x1F) << 1) | choice;
        }

        Ok(bits)
    }
}

fn branch_output(state: u8, input: bool) -> (bool, bool) {
    let combined = ((input as u8) << 6) | state;
    (parity(combined & G1), parity(combined & G2))
}

fn next_state(state: u8, input: bool) -> u8 {
    (state >> 1) | ((input as u8) << 5)
}

fn soft_distance(received: f32, expected: bool) -> f32 {
    let target = if expected { 1.0 } else { 0.0 };
    (received - target).abs()
}

fn parity(x: u8) -> bool {
    x.count_ones() % 2 == 1
}

pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |i| (byte >> (7 - i)) & 1 == 1))
        .collect()
}

pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | ((bit as u8) << (7 - i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_soft(bits: &[bool]) -> Vec<f32> {
        bits.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()
    }

    #[test]
    fn test_encoder_output_length() {
        let mut encoder = ConvolutionalEncoder::new();
        let encoded = encoder.encode(b"AB");
        assert_eq!(encoded.len(), (16 + 6) * 2);
        assert_eq!(encoded.len(), inner_encoded_bits(InnerFecScheme::V27, 2));
    }

    #[test]
    fn test_encoder_first_bits() {
        // A lone one bit from the zero state touches the top tap of both generators
        let mut encoder = ConvolutionalEncoder::new();
        assert_eq!(encoder.encode_bit(true), [true, true]);
        assert_eq!(encoder.encode_bit(false), [false, true]);
    }

    #[test]
    fn test_viterbi_clean_round_trip() {
        let data = b"Viterbi clean channel";
        let coded = inner_encode(data, InnerFecScheme::V27);
        let decoded = inner_decode(&to_soft(&coded), InnerFecScheme::V27, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_viterbi_corrects_scattered_hard_errors() {
        let data = b"{\"token_id\":\"abc123\",\"amount\":50.0}";
        let coded = inner_encode(data, InnerFecScheme::V27);
        let mut soft = to_soft(&coded);
        // Errors spaced well beyond the constraint length
        for idx in (5..soft.len()).step_by(40) {
            soft[idx] = 1.0 - soft[idx];
        }
        let decoded = inner_decode(&soft, InnerFecScheme::V27, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_viterbi_tolerates_erasures() {
        let data = [0x00, 0xFF, 0x55, 0xAA, 0x12, 0x34];
        let coded = inner_encode(&data, InnerFecScheme::V27);
        let mut soft = to_soft(&coded);
        for idx in (3..soft.len()).step_by(9) {
            soft[idx] = 0.5;
        }
        let decoded = inner_decode(&soft, InnerFecScheme::V27, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_uncoded_passthrough() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let coded = inner_encode(&data, InnerFecScheme::None);
        assert_eq!(coded.len(), 32);
        let decoded = inner_decode(&to_soft(&coded), InnerFecScheme::None, 4).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            inner_decode(&[0.0; 10], InnerFecScheme::V27, 4),
            Err(AudioModemError::InsufficientData)
        ));
        let mut decoder = ViterbiDecoder::new();
        assert!(matches!(
            decoder.decode_soft(&[0.0, 1.0, 0.0]),
            Err(AudioModemError::InvalidInputSize)
        ));
    }

    #[test]
    fn test_bit_packing() {
        let bits = bytes_to_bits(&[0b1010_0001]);
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, true]
        );
        assert_eq!(bits_to_bytes(&bits), vec![0b1010_0001]);
    }
}
