//! # Utility Modules
//!
//! Helpers shared by the bus layer and the CLI.

pub mod hex;

pub use hex::{decode_hex, encode_hex, format_hex_compact, pretty_hex};
