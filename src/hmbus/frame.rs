//! # Heatmiser V3 Frame Codec
//!
//! This module builds request frames and verifies reply frames of the
//! Heatmiser V3 protocol. Header fields are parsed with `nom`; the checksum is
//! CRC-16/CCITT-FALSE from the `crc` crate, sent low byte first.
//!
//! ## Layout
//!
//! Request (master to thermostat):
//!
//! ```text
//! dest | frame_len | 0x81 | func | start_lo | start_hi | len_lo | len_hi | payload.. | crc_lo | crc_hi
//! ```
//!
//! Reply (thermostat to master):
//!
//! ```text
//! 0x81 | len_lo | len_hi | src | func | [start_lo | start_hi | len_lo | len_hi | data..] | crc_lo | crc_hi
//! ```
//!
//! The bracketed part is only present in read replies; a write
//! acknowledgement is always 7 bytes.
//!
//! ## Usage
//!
//! ```rust
//! use heatmiser_rs::hmbus::frame::{RequestFrame, Protocol};
//!
//! let bytes = RequestFrame::read_all(1, Protocol::V3).encode();
//! assert_eq!(bytes, [0x01, 0x0A, 0x81, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x2C, 0x09]);
//! ```

use crate::constants::*;
use crate::error::FrameError;
use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_IBM_3740};
use nom::number::complete::{le_u16, u8 as byte};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection.
pub const HM_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Protocol revision spoken by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "hmv3")]
    V3,
}

/// Function code of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Read,
    Write,
}

impl Function {
    pub fn code(self) -> u8 {
        match self {
            Function::Read => HM_FUNC_READ,
            Function::Write => HM_FUNC_WRITE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            HM_FUNC_READ => Some(Function::Read),
            HM_FUNC_WRITE => Some(Function::Write),
            _ => None,
        }
    }
}

/// True for either broadcast destination.
pub fn is_broadcast(address: u8) -> bool {
    address == HM_BROADCAST_ADDR || address == HM_BROADCAST_ADDR_ZERO
}

/// Computes the frame checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    HM_CRC.checksum(data)
}

/// A request from the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub destination: u8,
    pub protocol: Protocol,
    pub source: u8,
    pub function: Function,
    pub start: u16,
    /// Bytes to read, or bytes carried by a write.
    pub length: u16,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn read(destination: u8, protocol: Protocol, start: u16, length: u16) -> Self {
        RequestFrame {
            destination,
            protocol,
            source: HM_MASTER_ADDR,
            function: Function::Read,
            start,
            length,
            payload: Vec::new(),
        }
    }

    /// Requests the whole DCB regardless of its length.
    pub fn read_all(destination: u8, protocol: Protocol) -> Self {
        Self::read(destination, protocol, HM_DCB_START, HM_RW_LENGTH_ALL)
    }

    pub fn write(destination: u8, protocol: Protocol, start: u16, payload: Vec<u8>) -> Self {
        RequestFrame {
            destination,
            protocol,
            source: HM_MASTER_ADDR,
            function: Function::Write,
            start,
            length: payload.len() as u16,
            payload,
        }
    }

    /// Number of bytes the encoded frame occupies.
    pub fn encoded_len(&self) -> usize {
        HM_REQUEST_OVERHEAD + self.payload.len()
    }

    /// Serializes the frame and appends its CRC.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self.protocol {
            Protocol::V3 => {
                buf.put_u8(self.destination);
                buf.put_u8(self.encoded_len() as u8);
                buf.put_u8(self.source);
                buf.put_u8(self.function.code());
                buf.put_u16_le(self.start);
                buf.put_u16_le(self.length);
                if self.function == Function::Write {
                    buf.put_slice(&self.payload);
                }
            }
        }
        let crc = checksum(&buf);
        buf.put_u16_le(crc);
        buf.to_vec()
    }
}

/// A reply from a thermostat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub destination: u8,
    pub source: u8,
    pub function: Function,
    /// Echoed start offset; zero for write acknowledgements.
    pub start: u16,
    /// Echoed read length; zero for write acknowledgements.
    pub length: u16,
    pub payload: Vec<u8>,
}

impl ReplyFrame {
    /// A write acknowledgement from `source`.
    pub fn write_ack(source: u8) -> Self {
        ReplyFrame {
            destination: HM_MASTER_ADDR,
            source,
            function: Function::Write,
            start: 0,
            length: 0,
            payload: Vec::new(),
        }
    }

    /// A read reply carrying `payload` from `start`.
    pub fn read_reply(source: u8, start: u16, payload: Vec<u8>) -> Self {
        ReplyFrame {
            destination: HM_MASTER_ADDR,
            source,
            function: Function::Read,
            start,
            length: payload.len() as u16,
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self.function {
            Function::Write => HM_FRAME_WRITE_RESP_LENGTH,
            Function::Read => HM_MIN_FRAME_READ_RESP_LENGTH + self.payload.len(),
        }
    }

    /// Serializes the reply the way a thermostat would send it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.destination);
        buf.put_u16_le(self.encoded_len() as u16);
        buf.put_u8(self.source);
        buf.put_u8(self.function.code());
        if self.function == Function::Read {
            buf.put_u16_le(self.start);
            buf.put_u16_le(self.length);
            buf.put_slice(&self.payload);
        }
        let crc = checksum(&buf);
        buf.put_u16_le(crc);
        buf.to_vec()
    }
}

/// Smallest valid reply for a function.
pub fn min_reply_len(function: Function) -> usize {
    match function {
        Function::Read => HM_MIN_FRAME_READ_RESP_LENGTH,
        Function::Write => HM_FRAME_WRITE_RESP_LENGTH,
    }
}

fn reply_header(input: &[u8]) -> IResult<&[u8], (u8, u16, u8, u8)> {
    tuple((byte, le_u16, byte, byte))(input)
}

fn read_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    tuple((le_u16, le_u16))(input)
}

/// Verifies a received reply and returns its contents.
///
/// The checksum is verified over the whole received buffer before any header
/// field is interpreted, so any corrupted byte is reported as
/// `ChecksumInvalid`.
pub fn decode_reply(
    raw: &[u8],
    expected_dest: u8,
    expected_src: u8,
    expected_function: Function,
) -> Result<ReplyFrame, FrameError> {
    let minimum = min_reply_len(expected_function);
    if raw.len() < minimum {
        return Err(FrameError::Truncated {
            expected: minimum,
            received: raw.len(),
        });
    }

    let (body, trailer) = raw.split_at(raw.len() - HM_CRC_LEN);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let calculated = checksum(body);
    if received != calculated {
        return Err(FrameError::ChecksumInvalid {
            received,
            calculated,
        });
    }

    let truncated = FrameError::Truncated {
        expected: minimum,
        received: raw.len(),
    };
    let (rest, (destination, frame_len, source, func)) =
        reply_header(body).map_err(|_| truncated.clone())?;

    let frame_len = frame_len as usize;
    if frame_len > raw.len() {
        return Err(FrameError::Truncated {
            expected: frame_len,
            received: raw.len(),
        });
    }
    if frame_len != raw.len() {
        return Err(FrameError::Mismatch {
            field: "length",
            expected: raw.len() as u16,
            received: frame_len as u16,
        });
    }
    if destination != expected_dest {
        return Err(FrameError::Mismatch {
            field: "destination",
            expected: expected_dest as u16,
            received: destination as u16,
        });
    }
    if source != expected_src {
        return Err(FrameError::Mismatch {
            field: "source",
            expected: expected_src as u16,
            received: source as u16,
        });
    }
    if func != expected_function.code() {
        return Err(FrameError::Mismatch {
            field: "function",
            expected: expected_function.code() as u16,
            received: func as u16,
        });
    }

    match expected_function {
        Function::Write => Ok(ReplyFrame::write_ack(source)),
        Function::Read => {
            let (data, (start, length)) = read_header(rest).map_err(|_| truncated)?;
            if data.len() != length as usize {
                return Err(FrameError::Mismatch {
                    field: "data length",
                    expected: length,
                    received: data.len() as u16,
                });
            }
            Ok(ReplyFrame {
                destination,
                source,
                function: Function::Read,
                start,
                length,
                payload: data.to_vec(),
            })
        }
    }
}
