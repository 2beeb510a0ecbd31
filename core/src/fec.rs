//! Outer forward error correction
//!
//! `rs8` is Reed-Solomon over GF(256) in RS(255,223) blocks: every block of
//! up to 223 data bytes gains 32 parity bytes, so up to 16 corrupted bytes
//! per block are repaired. A frame shorter than a full block is coded as a
//! shortened block.

use crate::error::{AudioModemError, Result};
use crate::profile::OuterFecScheme;
use reed_solomon::{Decoder as RsDecoder, Encoder as RsEncoder};

pub const RS_ECC_BYTES: usize = 32; // parity bytes per block
pub const RS_BLOCK_BYTES: usize = 255; // GF(256) code length
pub const RS_DATA_BYTES: usize = RS_BLOCK_BYTES - RS_ECC_BYTES; // 223

/// Length after the outer code is applied to `data_len` bytes.
pub fn outer_encoded_len(scheme: OuterFecScheme, data_len: usize) -> usize {
    match scheme {
        OuterFecScheme::None => data_len,
        OuterFecScheme::Rs8 => data_len + data_len.div_ceil(RS_DATA_BYTES) * RS_ECC_BYTES,
    }
}

pub fn outer_encode(data: &[u8], scheme: OuterFecScheme) -> Vec<u8> {
    match scheme {
        OuterFecScheme::None => data.to_vec(),
        OuterFecScheme::Rs8 => encode_rs8(data),
    }
}

/// Undo the outer code, repairing what it can. `data_len` is the length
/// that was handed to `outer_encode`.
pub fn outer_decode(bytes: &[u8], scheme: OuterFecScheme, data_len: usize) -> Result<Vec<u8>> {
    let mut decoded = match scheme {
        OuterFecScheme::None => bytes.to_vec(),
        OuterFecScheme::Rs8 => decode_rs8(bytes, data_len)?,
    };
    if decoded.len() < data_len {
        return Err(AudioModemError::FecError(format!(
            "decoded {} bytes, expected {}",
            decoded.len(),
            data_len
        )));
    }
    decoded.truncate(data_len);
    Ok(decoded)
}

fn encode_rs8(data: &[u8]) -> Vec<u8> {
    let encoder = RsEncoder::new(RS_ECC_BYTES);
    let mut output = Vec::with_capacity(outer_encoded_len(OuterFecScheme::Rs8, data.len()));
    for block in data.chunks(RS_DATA_BYTES) {
        let encoded = encoder.encode(block);
        output.extend_from_slice(&encoded);
    }
    output
}

fn decode_rs8(bytes: &[u8], data_len: usize) -> Result<Vec<u8>> {
    if bytes.len() != outer_encoded_len(OuterFecScheme::Rs8, data_len) {
        return Err(AudioModemError::InvalidInputSize);
    }

    let decoder = RsDecoder::new(RS_ECC_BYTES);
    let mut output = Vec::with_capacity(data_len);
    let mut remaining = data_len;
    let mut offset = 0;
    while remaining > 0 {
        let block_data = remaining.min(RS_DATA_BYTES);
        let block_len = block_data + RS_ECC_BYTES;
        let mut block = bytes[offset..offset + block_len].to_vec();

        if decoder.is_corrupted(&block) {
            let repaired = decoder
                .correct(&mut block, None)
                .map_err(|e| AudioModemError::FecError(format!("rs8 block at byte {}: {:?}", offset, e)))?;
            log::debug!("rs8 repaired block at byte {}", offset);
            output.extend_from_slice(repaired.data());
        } else {
            output.extend_from_slice(&block[..block_data]);
        }

        offset += block_len;
        remaining -= block_data;
    }

    Ok(output)
}
