//! # Thermostat Models
//!
//! Reference field tables and address maps for the Heatmiser PRT-E and
//! PRT-HW thermostats.
//!
//! The unique address space is shared by every model. A device's table is
//! the base fragment plus the extension fragments its [`Capabilities`] call
//! for; its address map then decides which of those fields exist physically
//! in the current program mode.
//!
//! | Model  | Mode | DCB length |
//! |--------|------|-----------:|
//! | PRT-E  | week |         64 |
//! | PRT-E  | day  |        148 |
//! | PRT-HW | week |         97 |
//! | PRT-HW | day  |        293 |

use crate::constants::*;
use crate::dcb::address_map::AddressMap;
use crate::dcb::field::{FieldDescriptor, FieldTable};
use crate::error::ConfigError;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fields that rarely change, such as configuration.
pub const MAX_AGE_LONG: Duration = Duration::from_secs(86_400);
pub const MAX_AGE_MEDIUM: Duration = Duration::from_secs(3_600);
/// User settings that may be changed at the thermostat.
pub const MAX_AGE_SHORT: Duration = Duration::from_secs(60);
/// Measurements and the clock.
pub const MAX_AGE_USHORT: Duration = Duration::from_secs(10);

/// Last unique address in use.
pub const MAX_UNIQUE_ADDRESS: u16 = 292;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    PrtE,
    PrtHw,
}

impl DeviceModel {
    /// Number reported in the `model` field.
    pub fn number(self) -> u16 {
        match self {
            DeviceModel::PrtE => HM_MODEL_PRT_E,
            DeviceModel::PrtHw => HM_MODEL_PRT_HW,
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            DeviceModel::PrtE => Capabilities::SEVEN_DAY,
            DeviceModel::PrtHw => Capabilities::SEVEN_DAY | Capabilities::HOT_WATER,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceModel::PrtE => write!(f, "PRT-E"),
            DeviceModel::PrtHw => write!(f, "PRT-HW"),
        }
    }
}

/// Schedule layout the thermostat is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramMode {
    /// Weekday and weekend schedules (5/2 day).
    Week,
    /// One schedule per day (7 day).
    Day,
}

impl ProgramMode {
    /// Number reported in the `programmode` field.
    pub fn number(self) -> u16 {
        match self {
            ProgramMode::Week => HM_PROG_MODE_WEEK,
            ProgramMode::Day => HM_PROG_MODE_DAY,
        }
    }
}

bitflags! {
    /// Optional parts of the field table a model carries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// Hot water demand and water schedules.
        const HOT_WATER = 0b0000_0001;
        /// Per-day schedules used in the 7 day program mode.
        const SEVEN_DAY = 0b0000_0010;
    }
}

fn field(name: &str, address: u16, length: usize, max_age: Duration) -> FieldDescriptor {
    FieldDescriptor::new(name, address, length, max_age)
}

const HEAT_SCHEDULE: [(u16, u16); 3] = [(0, 24), (0, 59), (5, 35)];
const WATER_SCHEDULE: [(u16, u16); 2] = [(0, 24), (0, 59)];

/// Fields every model has.
pub static BASE_FIELDS: Lazy<Vec<FieldDescriptor>> = Lazy::new(|| {
    vec![
        field("DCBlen", 0, 2, MAX_AGE_LONG),
        field("vendor", 2, 1, MAX_AGE_LONG),
        field("version", 3, 1, MAX_AGE_LONG),
        field("model", 4, 1, MAX_AGE_LONG).with_range(0, 5),
        field("tempformat", 5, 1, MAX_AGE_LONG).with_range(0, 1).writable(),
        field("switchdiff", 6, 1, MAX_AGE_LONG).with_range(1, 3).writable(),
        field("frostprot", 7, 1, MAX_AGE_LONG).with_range(0, 1).writable(),
        field("caloffset", 8, 2, MAX_AGE_LONG).writable(),
        field("outputdelay", 10, 1, MAX_AGE_LONG).with_range(0, 15).writable(),
        field("address", 11, 1, MAX_AGE_LONG).with_range(1, 32),
        field("updwnkeylimit", 12, 1, MAX_AGE_LONG).with_range(0, 10).writable(),
        field("sensorsavaliable", 13, 1, MAX_AGE_LONG).with_range(0, 4),
        field("optimumstart", 14, 1, MAX_AGE_LONG).with_range(0, 3).writable(),
        field("rateofchange", 15, 1, MAX_AGE_LONG),
        field("programmode", 16, 1, MAX_AGE_LONG).with_range(0, 1),
        field("frosttemp", 17, 1, MAX_AGE_LONG).with_range(7, 17).writable(),
        field("setroomtemp", 18, 1, MAX_AGE_SHORT).with_range(5, 35).writable(),
        field("floormaxlimit", 19, 1, MAX_AGE_LONG).with_range(20, 45).writable(),
        field("floormaxlimitenable", 20, 1, MAX_AGE_LONG).with_range(0, 1),
        field("onoff", 21, 1, MAX_AGE_SHORT).with_range(0, 1).writable(),
        field("keylock", 22, 1, MAX_AGE_SHORT).with_range(0, 1).writable(),
        field("runmode", 23, 1, MAX_AGE_SHORT).with_range(0, 1).writable(),
        field("holidayhours", 24, 2, MAX_AGE_SHORT).with_range(0, 720).writable(),
        field("tempholdmins", 26, 2, MAX_AGE_SHORT).with_range(0, 5760).writable(),
        field("remoteairtemp", 28, 2, MAX_AGE_USHORT).with_divisor(10),
        field("floortemp", 30, 2, MAX_AGE_USHORT).with_divisor(10),
        field("airtemp", 32, 2, MAX_AGE_USHORT).with_divisor(10),
        field("errorcode", 34, 1, MAX_AGE_SHORT),
        field("heatingdemand", 35, 1, MAX_AGE_USHORT).with_range(0, 1),
        field("currenttime", 37, 4, MAX_AGE_USHORT)
            .with_ranges(&[(1, 7), (0, 23), (0, 59), (0, 59)])
            .writable(),
        field("wday_heat", 41, 12, MAX_AGE_MEDIUM).with_ranges(&HEAT_SCHEDULE).writable(),
        field("wend_heat", 53, 12, MAX_AGE_MEDIUM).with_ranges(&HEAT_SCHEDULE).writable(),
    ]
});

/// Hot water control, PRT-HW only.
pub static HOT_WATER_FIELDS: Lazy<Vec<FieldDescriptor>> = Lazy::new(|| {
    vec![
        field("hotwaterdemand", 36, 1, MAX_AGE_USHORT)
            .with_range(0, 2)
            .writable()
            // back to program leaves the state unknown; forced off reads back as off
            .with_write_echo(&[
                (HM_HOTWATERDEMAND_WRITE_PROG, None),
                (HM_HOTWATERDEMAND_WRITE_OFF, Some(HM_HOTWATERDEMAND_READ_OFF)),
            ]),
        field("wday_water", 65, 16, MAX_AGE_MEDIUM).with_ranges(&WATER_SCHEDULE).writable(),
        field("wend_water", 81, 16, MAX_AGE_MEDIUM).with_ranges(&WATER_SCHEDULE).writable(),
    ]
});

const DAYS: [&str; 7] = ["mon", "tues", "wed", "thurs", "fri", "sat", "sun"];

/// Per-day heating schedules.
pub static SEVEN_DAY_HEAT_FIELDS: Lazy<Vec<FieldDescriptor>> = Lazy::new(|| {
    DAYS.iter()
        .enumerate()
        .map(|(i, day)| {
            field(&format!("{}_heat", day), 97 + 12 * i as u16, 12, MAX_AGE_MEDIUM)
                .with_ranges(&HEAT_SCHEDULE)
                .writable()
        })
        .collect()
});

/// Per-day hot water schedules.
pub static SEVEN_DAY_WATER_FIELDS: Lazy<Vec<FieldDescriptor>> = Lazy::new(|| {
    DAYS.iter()
        .enumerate()
        .map(|(i, day)| {
            field(&format!("{}_water", day), 181 + 16 * i as u16, 16, MAX_AGE_MEDIUM)
                .with_ranges(&WATER_SCHEDULE)
                .writable()
        })
        .collect()
});

/// Field table of every model, used for broadcasts.
pub fn full_table() -> Result<FieldTable, ConfigError> {
    FieldTable::from_fragments(&[
        BASE_FIELDS.as_slice(),
        HOT_WATER_FIELDS.as_slice(),
        SEVEN_DAY_HEAT_FIELDS.as_slice(),
        SEVEN_DAY_WATER_FIELDS.as_slice(),
    ])
}

/// Field table for a model, built from its capabilities.
pub fn table_for(model: DeviceModel) -> Result<FieldTable, ConfigError> {
    let caps = model.capabilities();
    let mut fragments: Vec<&[FieldDescriptor]> = vec![BASE_FIELDS.as_slice()];
    if caps.contains(Capabilities::HOT_WATER) {
        fragments.push(HOT_WATER_FIELDS.as_slice());
    }
    if caps.contains(Capabilities::SEVEN_DAY) {
        fragments.push(SEVEN_DAY_HEAT_FIELDS.as_slice());
        if caps.contains(Capabilities::HOT_WATER) {
            fragments.push(SEVEN_DAY_WATER_FIELDS.as_slice());
        }
    }
    FieldTable::from_fragments(&fragments)
}

/// Physical layout of a model in a program mode.
pub fn map_for(model: DeviceModel, mode: ProgramMode) -> Result<AddressMap, ConfigError> {
    let entries: &[(u16, Option<u16>)] = match (model, mode) {
        (DeviceModel::PrtHw, ProgramMode::Week) => &[(96, Some(0)), (MAX_UNIQUE_ADDRESS, None)],
        (DeviceModel::PrtHw, ProgramMode::Day) => &[(MAX_UNIQUE_ADDRESS, Some(0))],
        (DeviceModel::PrtE, ProgramMode::Week) => &[
            (35, Some(0)),
            (36, None),
            (64, Some(1)),
            (MAX_UNIQUE_ADDRESS, None),
        ],
        (DeviceModel::PrtE, ProgramMode::Day) => &[
            (35, Some(0)),
            (36, None),
            (64, Some(1)),
            (96, None),
            (180, Some(33)),
            (MAX_UNIQUE_ADDRESS, None),
        ],
    };
    AddressMap::new(entries)
}
