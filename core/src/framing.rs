use crate::error::{AudioModemError, DecodeError, Result};
use crate::profile::ChecksumScheme;
use crate::FRAME_HEADER_SIZE;

/// CRC-8 with polynomial 0xD5 (x^8 + x^7 + x^6 + x^4 + x^2 + 1)
pub fn crc8(data: &[u8]) -> u8 {
    const POLYNOMIAL: u8 = 0xD5;
    let mut crc = 0u8;

    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC-16-CCITT (poly 0x1021, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u32 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u32) << 8;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x10000 != 0 {
                crc ^= 0x1021;
            }
        }
    }
    (crc & 0xFFFF) as u16
}

/// CRC-32 (IEEE)
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn checksum_bytes(scheme: ChecksumScheme, data: &[u8]) -> Vec<u8> {
    match scheme {
        ChecksumScheme::Crc8 => vec![crc8(data)],
        ChecksumScheme::Crc16 => crc16(data).to_be_bytes().to_vec(),
        ChecksumScheme::Crc32 => crc32(data).to_be_bytes().to_vec(),
    }
}

/// Fixed-size frame: `[payload_len u16 BE][payload, zero padded][checksum BE]`.
/// The checksum covers header and padded body.
pub struct FrameEncoder {
    frame_length: usize,
    checksum: ChecksumScheme,
}

pub struct FrameDecoder {
    frame_length: usize,
    checksum: ChecksumScheme,
}

impl FrameEncoder {
    pub fn new(frame_length: usize, checksum: ChecksumScheme) -> Self {
        Self { frame_length, checksum }
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.frame_length + self.checksum.size_bytes()
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.frame_length {
            return Err(AudioModemError::PayloadTooLarge {
                len: payload.len(),
                max: self.frame_length,
            });
        }

        let mut frame = Vec::with_capacity(self.encoded_len());
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        frame.resize(FRAME_HEADER_SIZE + self.frame_length, 0);

        let checksum = checksum_bytes(self.checksum, &frame);
        frame.extend_from_slice(&checksum);
        Ok(frame)
    }
}

impl FrameDecoder {
    pub fn new(frame_length: usize, checksum: ChecksumScheme) -> Self {
        Self { frame_length, checksum }
    }

    /// Verify the checksum and return the payload bytes.
    pub fn decode(&self, data: &[u8]) -> std::result::Result<Vec<u8>, DecodeError> {
        let body_end = FRAME_HEADER_SIZE + self.frame_length;
        if data.len() < body_end + self.checksum.size_bytes() {
            return Err(DecodeError::ChecksumFailed);
        }

        let received = &data[body_end..body_end + self.checksum.size_bytes()];
        let computed = checksum_bytes(self.checksum, &data[..body_end]);
        if received != computed.as_slice() {
            return Err(DecodeError::ChecksumFailed);
        }

        let payload_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        if payload_len > self.frame_length {
            return Err(DecodeError::MalformedPayload(format!(
                "length field {} exceeds frame length {}",
                payload_len, self.frame_length
            )));
        }

        Ok(data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let encoder = FrameEncoder::new(16, ChecksumScheme::Crc32);
        let decoder = FrameDecoder::new(16, ChecksumScheme::Crc32);

        let encoded = encoder.encode(b"Hello").unwrap();
        assert_eq!(encoded.len(), 2 + 16 + 4);
        assert_eq!(&encoded[..2], &[0, 5]);
        assert_eq!(decoder.decode(&encoded).unwrap(), b"Hello");
    }

    #[test]
    fn test_every_single_bit_flip_rejected() {
        for scheme in [ChecksumScheme::Crc8, ChecksumScheme::Crc16, ChecksumScheme::Crc32] {
            let encoder = FrameEncoder::new(12, scheme);
            let decoder = FrameDecoder::new(12, scheme);
            let encoded = encoder.encode(b"abc123|50").unwrap();

            for bit in 0..encoded.len() * 8 {
                let mut corrupted = encoded.clone();
                corrupted[bit / 8] ^= 1 << (bit % 8);
                assert_eq!(
                    decoder.decode(&corrupted),
                    Err(DecodeError::ChecksumFailed),
                    "{:?} bit {}",
                    scheme,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_payload_too_large() {
        let encoder = FrameEncoder::new(4, ChecksumScheme::Crc16);
        assert!(matches!(
            encoder.encode(b"too long"),
            Err(AudioModemError::PayloadTooLarge { len: 8, max: 4 })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let encoder = FrameEncoder::new(4, ChecksumScheme::Crc8);
        let decoder = FrameDecoder::new(4, ChecksumScheme::Crc8);
        let encoded = encoder.encode(&[]).unwrap();
        assert_eq!(decoder.decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_length_field_past_body_is_malformed() {
        let decoder = FrameDecoder::new(4, ChecksumScheme::Crc16);
        let mut frame = vec![0x00, 0x09, 1, 2, 3, 4];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            decoder.decode(&frame),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_known_crc_values() {
        // Standard check values for "123456789"
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
