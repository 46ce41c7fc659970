//! Heatmiser V3 Protocol Constants
//!
//! This module defines the constants used by the Heatmiser V3 wire protocol
//! and the default bus timing, reconstructed from the values the thermostats
//! are known to accept.

use std::time::Duration;

/// Address the master uses as the source of every request.
pub const HM_MASTER_ADDR: u8 = 0x81;

/// Broadcast destination; no device acknowledges a broadcast.
pub const HM_BROADCAST_ADDR: u8 = 0xFF;

/// Legacy broadcast destination, also unacknowledged.
pub const HM_BROADCAST_ADDR_ZERO: u8 = 0x00;

/// Highest unicast address a thermostat can be configured with.
pub const HM_MAX_DEVICE_ADDR: u8 = 32;

// Function codes
pub const HM_FUNC_READ: u8 = 0x00;
pub const HM_FUNC_WRITE: u8 = 0x01;

// Read-all request: start at the beginning of the DCB with the length marker
pub const HM_DCB_START: u16 = 0x0000;
pub const HM_RW_LENGTH_ALL: u16 = 0xFFFF;

// ----------------------------------------------------------------------------
// Frame layout
// ----------------------------------------------------------------------------

/// Request header: dest, frame length, source, function, start (2), length (2).
pub const HM_REQUEST_HEADER_LEN: usize = 8;

/// Trailing CRC length.
pub const HM_CRC_LEN: usize = 2;

/// Request framing overhead (header + CRC).
pub const HM_REQUEST_OVERHEAD: usize = HM_REQUEST_HEADER_LEN + HM_CRC_LEN;

/// A write acknowledgement: dest, length (2), source, function, CRC (2).
pub const HM_FRAME_WRITE_RESP_LENGTH: usize = 7;

/// A read reply without data: ack header plus start (2) and length (2).
pub const HM_MIN_FRAME_READ_RESP_LENGTH: usize = 11;

// ----------------------------------------------------------------------------
// Serial line and bus timing defaults
// ----------------------------------------------------------------------------

pub const HM_DEFAULT_BAUD: u32 = 4800;

/// Full reply timeout.
pub const HM_COM_TIMEOUT: Duration = Duration::from_millis(800);

/// Time allowed for the first byte of a reply.
pub const HM_COM_START_TIMEOUT: Duration = Duration::from_millis(100);

/// Floor for the remaining-bytes timeout once the first byte has arrived.
pub const HM_COM_MIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Idle time the bus needs between the end of a reply and the next request.
pub const HM_COM_BUS_RESET_TIME: Duration = Duration::from_millis(100);

/// Idle time after a broadcast before the bus may be driven again.
pub const HM_COM_SEND_MIN_TIME: Duration = Duration::from_millis(1000);

pub const HM_WRITE_MAX_ATTEMPTS: u32 = 3;
pub const HM_READ_MAX_ATTEMPTS: u32 = 2;

// ----------------------------------------------------------------------------
// Read time estimation (fit against one PRT-HW and five PRT-E thermostats)
// ----------------------------------------------------------------------------

pub const HM_READ_TIME_PER_BYTE: Duration = Duration::from_nanos(2_075_000);
pub const HM_READ_TIME_BASE: Duration = Duration::from_nanos(70_727_000);

/// Planned reads this close to a full DCB read are replaced by a full read.
pub const HM_FULL_READ_MARGIN: Duration = Duration::from_millis(20);

// ----------------------------------------------------------------------------
// Clock checks
// ----------------------------------------------------------------------------

pub const HM_DAY_SECS: u32 = 86_400;
pub const HM_WEEK_SECS: u32 = 7 * HM_DAY_SECS;
pub const HM_TIME_ERR_LIMIT_SECS: u32 = 20;

// ----------------------------------------------------------------------------
// Field value constants
// ----------------------------------------------------------------------------

pub const HM_ONOFF_OFF: u16 = 0;
pub const HM_ONOFF_ON: u16 = 1;
pub const HM_FROST_PROT_OFF: u16 = 0;
pub const HM_FROST_PROT_ON: u16 = 1;
pub const HM_RUNMODE_HEAT: u16 = 0;
pub const HM_RUNMODE_FROST: u16 = 1;
pub const HM_KEYLOCK_OFF: u16 = 0;
pub const HM_KEYLOCK_ON: u16 = 1;

pub const HM_HOTWATERDEMAND_WRITE_PROG: u16 = 0;
pub const HM_HOTWATERDEMAND_WRITE_ON: u16 = 1;
pub const HM_HOTWATERDEMAND_WRITE_OFF: u16 = 2;
pub const HM_HOTWATERDEMAND_READ_OFF: u16 = 0;

pub const HM_SENSORS_INT_ONLY: u16 = 0;
pub const HM_SENSORS_EXT_ONLY: u16 = 1;
pub const HM_SENSORS_FLOOR_ONLY: u16 = 2;
pub const HM_SENSORS_INT_FLOOR: u16 = 3;
pub const HM_SENSORS_EXT_FLOOR: u16 = 4;

/// Model numbers reported in the `model` field.
pub const HM_MODEL_PRT_E: u16 = 3;
pub const HM_MODEL_PRT_HW: u16 = 4;

/// Program mode numbers reported in the `programmode` field.
pub const HM_PROG_MODE_WEEK: u16 = 0;
pub const HM_PROG_MODE_DAY: u16 = 1;
