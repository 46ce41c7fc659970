//! # Configuration
//!
//! Bus, timing and clock settings are explicit records handed to the
//! transport, protocol client and devices when they are built. Every record
//! has a `Default` carrying the protocol defaults from [`crate::constants`].
//!
//! A whole network can be described in a JSON file:
//!
//! ```json
//! {
//!   "port": "/dev/ttyUSB0",
//!   "bus": { "baudrate": 4800 },
//!   "clock": { "auto_correct": true },
//!   "devices": [
//!     { "name": "Kit", "address": 1, "model": "prt_hw", "program_mode": "day" },
//!     { "name": "B1", "address": 2, "model": "prt_e", "program_mode": "week" }
//!   ]
//! }
//! ```

use crate::constants::*;
use crate::dcb::models::{DeviceModel, ProgramMode};
use crate::hmbus::frame::Protocol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serial line and bus discipline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub baudrate: u32,
    /// Full reply timeout; also the wait before discarding input after a CRC failure.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Wait for the first byte of a reply.
    #[serde(with = "millis")]
    pub start_timeout: Duration,
    /// Floor for the remaining-bytes timeout.
    #[serde(with = "millis")]
    pub min_timeout: Duration,
    /// Idle time required between a reply and the next request.
    #[serde(with = "millis")]
    pub bus_settle_time: Duration,
    /// Idle time required after a broadcast.
    #[serde(with = "millis")]
    pub send_min_time: Duration,
    pub write_max_attempts: u32,
    pub read_max_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            baudrate: HM_DEFAULT_BAUD,
            timeout: HM_COM_TIMEOUT,
            start_timeout: HM_COM_START_TIMEOUT,
            min_timeout: HM_COM_MIN_TIMEOUT,
            bus_settle_time: HM_COM_BUS_RESET_TIME,
            send_min_time: HM_COM_SEND_MIN_TIME,
            write_max_attempts: HM_WRITE_MAX_ATTEMPTS,
            read_max_attempts: HM_READ_MAX_ATTEMPTS,
        }
    }
}

/// Empirical read duration model, `per_byte * L + per_read`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingModel {
    #[serde(with = "micros")]
    pub per_byte: Duration,
    #[serde(with = "micros")]
    pub per_read: Duration,
    /// Bus cost between two consecutive reads.
    #[serde(with = "micros")]
    pub between_reads: Duration,
    /// Plans estimated within this margin of a full read become a full read.
    #[serde(with = "micros")]
    pub full_read_margin: Duration,
}

impl Default for TimingModel {
    fn default() -> Self {
        TimingModel {
            per_byte: HM_READ_TIME_PER_BYTE,
            per_read: HM_READ_TIME_BASE,
            between_reads: HM_COM_BUS_RESET_TIME,
            full_read_margin: HM_FULL_READ_MARGIN,
        }
    }
}

impl TimingModel {
    /// Estimated duration of one read of `length` bytes, settle time excluded.
    pub fn read_time(&self, length: usize) -> Duration {
        self.per_byte * length as u32 + self.per_read
    }
}

/// Device clock checking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Drift tolerated before `TimeError::Drift`.
    pub drift_limit_secs: u32,
    /// Errors above this are reported as a wrong day rather than drift.
    pub wrong_day_secs: u32,
    /// Write local time back instead of returning the error.
    pub auto_correct: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            drift_limit_secs: HM_TIME_ERR_LIMIT_SECS,
            wrong_day_secs: HM_DAY_SECS,
            auto_correct: false,
        }
    }
}

/// One thermostat on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub long_name: Option<String>,
    pub address: u8,
    #[serde(default)]
    pub protocol: Protocol,
    pub model: DeviceModel,
    pub program_mode: ProgramMode,
    /// Read missing fields from the device instead of failing.
    #[serde(default = "default_true")]
    pub auto_read: bool,
    /// Maximum age for air temperature reads, seconds.
    #[serde(default)]
    pub max_age_temp_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(name: &str, address: u8, model: DeviceModel, program_mode: ProgramMode) -> Self {
        DeviceConfig {
            name: name.to_string(),
            long_name: None,
            address,
            protocol: Protocol::default(),
            model,
            program_mode,
            auto_read: true,
            max_age_temp_secs: None,
        }
    }
}

/// A serial port and the devices attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub port: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub timing: TimingModel,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl NetworkConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}
