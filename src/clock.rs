//! Device clock checking.
//!
//! Thermostats keep only a time of week (day 1 to 7 with Monday as 1, hour,
//! minute, second). The check compares it with local time taken when the
//! clock field was read, measuring the difference around the week boundary so
//! that Sunday 23:59:55 and Monday 00:00:00 are five seconds apart.

use crate::config::ClockConfig;
use crate::constants::{HM_DAY_SECS, HM_WEEK_SECS};
use crate::error::TimeError;
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use log::debug;

/// A time of week as the thermostat stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekTime {
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WeekTime {
    pub fn new(day: u8, hour: u8, minute: u8, second: u8) -> Self {
        WeekTime {
            day,
            hour,
            minute,
            second,
        }
    }

    pub fn from_datetime<Tz: TimeZone>(time: &DateTime<Tz>) -> Self {
        WeekTime {
            day: time.weekday().number_from_monday() as u8,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            // leap seconds are not representable on the device
            second: time.second().min(59) as u8,
        }
    }

    /// Parses the 4-byte `currenttime` field.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [day, hour, minute, second] => Some(WeekTime::new(*day, *hour, *minute, *second)),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        vec![self.day, self.hour, self.minute, self.second]
    }

    /// Seconds since Monday 00:00:00.
    pub fn week_secs(&self) -> u32 {
        (self.day.max(1) as u32 - 1) * HM_DAY_SECS
            + self.hour as u32 * 3600
            + self.minute as u32 * 60
            + self.second as u32
    }
}

/// Difference between two times of week, taking the shorter way round.
pub fn clock_error(local: &WeekTime, remote: &WeekTime) -> u32 {
    let direct = local.week_secs().abs_diff(remote.week_secs());
    let wrapped = HM_WEEK_SECS.abs_diff(direct);
    direct.min(wrapped)
}

/// Checks `remote` against `local`, returning the error in seconds when acceptable.
pub fn check(local: &WeekTime, remote: &WeekTime, config: &ClockConfig) -> Result<u32, TimeError> {
    let error = clock_error(local, remote);
    debug!(
        "Local time {}, remote time {}, error {}",
        local.week_secs(),
        remote.week_secs(),
        error
    );
    if error > config.wrong_day_secs {
        return Err(TimeError::WrongDay {
            local_day: local.day,
            device_day: remote.day,
        });
    }
    if error > config.drift_limit_secs {
        return Err(TimeError::Drift { seconds: error });
    }
    Ok(error)
}
