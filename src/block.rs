//! IEEE-488.2 binary blocks and the packed little-endian `f64` payloads
//! they carry.
//!
//! A definite-length block is framed as `#<d><len><bytes>`, where `<d>` is a
//! single digit giving the number of digits in `<len>`. A `<d>` of `0` marks an
//! indefinite-length block whose payload runs until the line terminator.

use crate::error::DecodeError;

/// The byte that introduces a binary block.
pub const BLOCK_START: u8 = b'#';

/// The size of one encoded value.
const VALUE_SIZE: usize = std::mem::size_of::<f64>();

/// The framing of a binary block, as described by its header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlockLength {
    /// The payload is exactly this many bytes long.
    Definite(usize),
    /// The payload runs until the line terminator.
    Indefinite,
}

/// Parse the header of a block.
///
/// Returns `Ok(None)` if `bytes` does not yet contain the whole header.
/// Otherwise returns the block's length and the size of the header in bytes.
pub fn parse_header(bytes: &[u8]) -> Result<Option<(BlockLength, usize)>, DecodeError> {
    let Some(&first) = bytes.first() else {
        return Ok(None);
    };
    if first != BLOCK_START {
        return Err(DecodeError::new("block does not start with `#`", bytes.len()));
    }
    let Some(&digit_count) = bytes.get(1) else {
        return Ok(None);
    };
    if !digit_count.is_ascii_digit() {
        return Err(DecodeError::new(
            "block header digit count is not a digit",
            bytes.len(),
        ));
    }
    let digit_count = usize::from(digit_count - b'0');
    if digit_count == 0 {
        return Ok(Some((BlockLength::Indefinite, 2)));
    }
    let header_len = 2 + digit_count;
    let Some(digits) = bytes.get(2..header_len) else {
        return Ok(None);
    };
    let mut len = 0usize;
    for &digit in digits {
        if !digit.is_ascii_digit() {
            return Err(DecodeError::new(
                "block header length is not a number",
                bytes.len(),
            ));
        }
        len = len
            .checked_mul(10)
            .and_then(|len| len.checked_add(usize::from(digit - b'0')))
            .ok_or_else(|| DecodeError::new("block header length overflows", bytes.len()))?;
    }
    Ok(Some((BlockLength::Definite(len), header_len)))
}

/// Decode a payload of packed little-endian `f64` values.
pub fn decode_f64_le(payload: &[u8]) -> Result<Vec<f64>, DecodeError> {
    if payload.len() % VALUE_SIZE != 0 {
        return Err(DecodeError::new(
            "length is not a multiple of 8",
            payload.len(),
        ));
    }
    Ok(payload
        .chunks_exact(VALUE_SIZE)
        .map(|chunk| {
            let mut bytes = [0u8; VALUE_SIZE];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect())
}

/// Encode values as a definite-length block of packed little-endian `f64`s.
pub fn encode_definite_block(values: &[f64]) -> Vec<u8> {
    let len = (values.len() * VALUE_SIZE).to_string();
    let mut block = Vec::with_capacity(2 + len.len() + values.len() * VALUE_SIZE);
    block.push(BLOCK_START);
    block.extend_from_slice(len.len().to_string().as_bytes());
    block.extend_from_slice(len.as_bytes());
    for value in values {
        block.extend_from_slice(&value.to_le_bytes());
    }
    block
}
