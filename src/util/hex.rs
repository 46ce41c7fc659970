//! # Hex Helpers
//!
//! Hex formatting for frame logging and the CLI's DCB dumps, and parsing of
//! raw field values typed on the command line.
//!
//! ```rust
//! use heatmiser_rs::util::hex::{decode_hex, encode_hex, format_hex_compact};
//!
//! let frame = [0x01, 0x0A, 0x81, 0x00];
//! assert_eq!(encode_hex(&frame), "010a8100");
//! assert_eq!(format_hex_compact(&frame), "01 0a 81 00");
//! assert_eq!(decode_hex("01 0A 81 00").unwrap(), frame);
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decodes hex, ignoring whitespace.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }
    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Formats data as "01 0a 81 00" for log lines.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dump with the DCB offset at the start of each line.
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(1);
    data.chunks(width)
        .enumerate()
        .map(|(i, chunk)| format!("{:04}: {}", i * width, format_hex_compact(chunk)))
        .collect::<Vec<_>>()
        .join("\n")
}
