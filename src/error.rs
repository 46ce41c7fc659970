//! # Heatmiser Error Handling
//!
//! This module defines the error types of each layer of the crate and the
//! crate-level [`HeatmiserError`] that wraps them.

use thiserror::Error;

/// Faults of the serial channel itself. Never retried by the protocol layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port could not be opened, written, flushed or cleared.
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),

    /// No byte arrived within the start-of-response timeout.
    #[error("No response")]
    NoResponse,
}

/// A reply that cannot be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Invalid CRC: received 0x{received:04X}, calculated 0x{calculated:04X}")]
    ChecksumInvalid { received: u16, calculated: u16 },

    #[error("Frame {field} mismatch: expected {expected}, received {received}")]
    Mismatch {
        field: &'static str,
        expected: u16,
        received: u16,
    },
}

/// A transaction that did not complete within its attempt budget.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed after {attempts} attempts: {last_cause}")]
    Failed {
        attempts: u32,
        last_cause: Box<HeatmiserError>,
    },
}

/// Bad caller input, detected before anything is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown field {0}")]
    UnknownField(String),

    #[error("Field {0} is not writable")]
    NotWritable(String),

    #[error("Field {field} expects {expected} bytes, got {received}")]
    WrongLength {
        field: String,
        expected: usize,
        received: usize,
    },

    #[error("Field {field} value {value} outside {min}..={max}")]
    OutOfRange {
        field: String,
        value: u16,
        min: u16,
        max: u16,
    },

    #[error("Field {0} is not present on this device")]
    NotPresent(String),

    #[error("Field {0} must be read first")]
    NotRead(String),
}

/// A single decoded field that could not be accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Field {field} value {value} outside {min}..={max}")]
    OutOfRange {
        field: String,
        value: u16,
        min: u16,
        max: u16,
    },

    #[error("Field {field} is {actual}, expected {expected}")]
    Unexpected {
        field: String,
        expected: u16,
        actual: u16,
    },

    #[error("Field {field} lies outside the {received} bytes read")]
    Missing { field: String, received: usize },
}

/// Device clock inconsistent with local time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("Incorrect day: local is {local_day}, device is {device_day}")]
    WrongDay { local_day: u8, device_day: u8 },

    #[error("Clock drift of {seconds}s exceeds limit")]
    Drift { seconds: u32 },

    #[error("Clock has not been read")]
    NotRead,
}

/// Malformed static configuration. Fatal at construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Address map is empty")]
    EmptyMap,

    #[error("Address map bounds must increase: {previous} then {next}")]
    UnorderedMap { previous: u16, next: u16 },

    #[error("DCB length cannot be resolved from the address map")]
    UnresolvableLength,

    #[error("Field {field} at unique address {address} lies outside the address map")]
    FieldOutsideMap { field: String, address: u16 },

    #[error("Duplicate field {0}")]
    DuplicateField(String),

    #[error("Fields {first} and {second} overlap")]
    OverlappingFields { first: String, second: String },

    #[error("Field {field} at unique address {address} runs past the address space")]
    AddressOverflow { field: String, address: u16 },

    #[error("Map entry up to {bound} has offset {offset} beyond its first address {first}")]
    OffsetBeyondRange { bound: u16, offset: u16, first: u16 },

    #[error("Field {field} has unsupported length {length}")]
    UnsupportedLength { field: String, length: usize },

    #[error("Invalid device address {0}")]
    InvalidAddress(u8),

    #[error("Duplicate device address {0}")]
    DuplicateAddress(u8),

    #[error("Duplicate device name {0}")]
    DuplicateDevice(String),

    #[error("Unknown device {0}")]
    UnknownDevice(String),
}

/// Represents every error the crate can surface.
#[derive(Debug, Error)]
pub enum HeatmiserError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HeatmiserError {
    /// Hardware faults propagate immediately; everything else on the wire is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            HeatmiserError::Transport(TransportError::Io(_)) => false,
            HeatmiserError::Transport(TransportError::NoResponse) => true,
            HeatmiserError::Frame(_) | HeatmiserError::Protocol(_) => true,
            _ => false,
        }
    }

    /// True when the failure was a CRC mismatch, which needs the input cleared.
    pub fn is_checksum(&self) -> bool {
        matches!(self, HeatmiserError::Frame(FrameError::ChecksumInvalid { .. }))
    }
}

impl From<std::io::Error> for HeatmiserError {
    fn from(err: std::io::Error) -> Self {
        HeatmiserError::Transport(TransportError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, HeatmiserError>;
