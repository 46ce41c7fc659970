//! # Thermostat Operations
//!
//! Higher level operations on a [`Device`]: temperature overrides, holiday
//! and run modes, schedules, air temperature by sensor selection and the
//! state the thermostat display is in.
//!
//! The display follows a small state machine:
//!
//! ```text
//!            switch_off                       switch_swap
//! Frost|Setpoint -> Off | OffFrost     any       -> Setpoint  (on, heating enabled)
//! OffFrost       -> Off                Off|OffFrost|Setpoint -> Frost (on, heating disabled)
//! Off            -> OffFrost
//! ```
//!
//! Which of `Off` and `OffFrost` is reached depends on frost protection.

use crate::constants::*;
use crate::dcb::cache::MaxAge;
use crate::dcb::field::FieldValue;
use crate::device::Device;
use crate::error::{FieldError, Result, ValidationError};
use crate::hmbus::protocol::ProtocolClient;
use crate::hmbus::serial::BusPort;
use log::warn;
use std::fmt;
use std::time::Duration;

/// State of the thermostat display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayState {
    /// Off without frost protection.
    #[default]
    Off,
    /// Off, still protecting against frost.
    OffFrost,
    /// Holding the frost temperature.
    Frost,
    /// Heating to the room set point.
    Setpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    SwitchOff,
    SwitchSwap,
}

/// Guard inputs, taken from the device's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions {
    /// `onoff` is on.
    pub on: bool,
    /// `frostprot` is off.
    pub frost_protection_disabled: bool,
    /// No holiday running and `runmode` is heat.
    pub heating_enabled: bool,
}

impl Conditions {
    /// Builds the guards from cached values; `None` until they have all been read.
    pub fn from_device(device: &Device) -> Option<Self> {
        Some(Conditions {
            on: device.int_value("onoff")? == HM_ONOFF_ON,
            frost_protection_disabled: device.int_value("frostprot")? == HM_FROST_PROT_OFF,
            heating_enabled: device.int_value("holidayhours")? == 0
                && device.int_value("runmode")? == HM_RUNMODE_HEAT,
        })
    }
}

impl DisplayState {
    /// Next state for `event`, or `None` if the event does not apply.
    pub fn transition(self, event: DisplayEvent, cond: &Conditions) -> Option<Self> {
        use DisplayState::*;
        match (event, self) {
            (DisplayEvent::SwitchOff, Frost | Setpoint) => Some(if cond.frost_protection_disabled {
                Off
            } else {
                OffFrost
            }),
            (DisplayEvent::SwitchOff, OffFrost) => cond.frost_protection_disabled.then_some(Off),
            (DisplayEvent::SwitchOff, Off) => (!cond.frost_protection_disabled).then_some(OffFrost),
            (DisplayEvent::SwitchSwap, _) if cond.on && cond.heating_enabled => Some(Setpoint),
            (DisplayEvent::SwitchSwap, Off | OffFrost | Setpoint) if cond.on => Some(Frost),
            (DisplayEvent::SwitchSwap, _) => None,
        }
    }

    /// Temperature the thermostat regulates to in this state.
    pub fn threshold(self, setroomtemp: u16, frosttemp: u16) -> Option<u16> {
        match self {
            DisplayState::Off => None,
            DisplayState::OffFrost | DisplayState::Frost => Some(frosttemp),
            DisplayState::Setpoint => Some(setroomtemp),
        }
    }
}

/// Display state machine for one thermostat.
#[derive(Debug, Clone, Default)]
pub struct Thermostat {
    state: DisplayState,
}

impl Thermostat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Applies `event`; returns whether the state changed.
    pub fn fire(&mut self, event: DisplayEvent, cond: &Conditions) -> bool {
        match self.state.transition(event, cond) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }
}

/// What the thermostat is currently regulating to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempState {
    Off,
    OffFrost,
    Holiday { hours: u16 },
    Frost,
    Held { minutes: u16, temp: u16 },
    Program { temp: u16 },
}

impl fmt::Display for TempState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempState::Off => write!(f, "controller off without frost protection"),
            TempState::OffFrost => write!(f, "controller off"),
            TempState::Holiday { hours } => write!(f, "controller on holiday for {} hours", hours),
            TempState::Frost => write!(f, "controller in frost mode"),
            TempState::Held { minutes, temp } => {
                write!(f, "temp held for {} mins at {}", minutes, temp)
            }
            TempState::Program { temp } => write!(f, "temp set to {}", temp),
        }
    }
}

/// Values [`classify`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFields {
    pub onoff: u16,
    pub frostprot: u16,
    pub holidayhours: u16,
    pub runmode: u16,
    pub tempholdmins: u16,
    pub setroomtemp: u16,
}

pub const STATE_FIELDS: [&str; 6] = [
    "onoff",
    "frostprot",
    "holidayhours",
    "runmode",
    "tempholdmins",
    "setroomtemp",
];

/// Classifies the regulation state, in order of precedence.
pub fn classify(f: &StateFields) -> TempState {
    if f.onoff == HM_ONOFF_OFF && f.frostprot == HM_FROST_PROT_OFF {
        TempState::Off
    } else if f.onoff == HM_ONOFF_OFF {
        TempState::OffFrost
    } else if f.holidayhours != 0 {
        TempState::Holiday {
            hours: f.holidayhours,
        }
    } else if f.runmode == HM_RUNMODE_FROST {
        TempState::Frost
    } else if f.tempholdmins != 0 {
        TempState::Held {
            minutes: f.tempholdmins,
            temp: f.setroomtemp,
        }
    } else {
        TempState::Program {
            temp: f.setroomtemp,
        }
    }
}

/// What the hot water output is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterState {
    Off,
    Holiday { hours: u16 },
    /// Demanding hot water.
    On,
    Idle,
}

impl fmt::Display for WaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaterState::Off => write!(f, "hot water off"),
            WaterState::Holiday { hours } => write!(f, "hot water on holiday for {} hours", hours),
            WaterState::On => write!(f, "hot water on"),
            WaterState::Idle => write!(f, "hot water idle"),
        }
    }
}

pub const WATER_STATE_FIELDS: [&str; 3] = ["onoff", "holidayhours", "hotwaterdemand"];

/// Classifies the hot water output from `onoff`, `holidayhours` and `hotwaterdemand`.
pub fn classify_water(onoff: u16, holidayhours: u16, demand: u16) -> WaterState {
    if onoff == HM_ONOFF_OFF {
        WaterState::Off
    } else if holidayhours != 0 {
        WaterState::Holiday {
            hours: holidayhours,
        }
    } else if demand == HM_HOTWATERDEMAND_READ_OFF {
        WaterState::Idle
    } else {
        WaterState::On
    }
}

/// Value written to `hotwaterdemand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotWaterDemand {
    /// Hand control back to the water schedule.
    Program,
    On,
    Off,
}

impl HotWaterDemand {
    pub fn code(self) -> u16 {
        match self {
            HotWaterDemand::Program => HM_HOTWATERDEMAND_WRITE_PROG,
            HotWaterDemand::On => HM_HOTWATERDEMAND_WRITE_ON,
            HotWaterDemand::Off => HM_HOTWATERDEMAND_WRITE_OFF,
        }
    }
}

/// Which sensor the air temperature comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirSensor {
    Internal,
    Remote,
}

impl AirSensor {
    pub fn from_sensors(sensors: u16) -> Option<Self> {
        match sensors {
            HM_SENSORS_INT_ONLY | HM_SENSORS_INT_FLOOR => Some(AirSensor::Internal),
            HM_SENSORS_EXT_ONLY | HM_SENSORS_EXT_FLOOR => Some(AirSensor::Remote),
            // floor sensor only, no air temperature
            HM_SENSORS_FLOOR_ONLY => None,
            _ => None,
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            AirSensor::Internal => "airtemp",
            AirSensor::Remote => "remoteairtemp",
        }
    }
}

const HEAT_PAD: [u8; 3] = [24, 0, 12];
const WATER_PAD: [u8; 2] = [24, 0];

/// Fills unused schedule slots with the "not used" marker.
pub fn pad_schedule(entries: &[u8], length: usize, water: bool) -> Vec<u8> {
    let pad: &[u8] = if water { &WATER_PAD } else { &HEAT_PAD };
    let mut out = entries.to_vec();
    out.truncate(length);
    while out.len() < length {
        let i = out.len() % pad.len();
        out.push(pad[i]);
    }
    out
}

const WATER_DAYS: [&str; 7] = [
    "mon_water",
    "tues_water",
    "wed_water",
    "thurs_water",
    "fri_water",
    "sat_water",
    "sun_water",
];

impl Device {
    fn require_int(&self, name: &str) -> Result<u16> {
        self.int_value(name)
            .ok_or_else(|| ValidationError::NotRead(name.to_string()).into())
    }

    /// Reads the regulation state fields and classifies them.
    pub async fn read_temp_state<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
    ) -> Result<TempState> {
        self.read_fields(client, &STATE_FIELDS, MaxAge::Default).await?;
        Ok(classify(&StateFields {
            onoff: self.require_int("onoff")?,
            frostprot: self.require_int("frostprot")?,
            holidayhours: self.require_int("holidayhours")?,
            runmode: self.require_int("runmode")?,
            tempholdmins: self.require_int("tempholdmins")?,
            setroomtemp: self.require_int("setroomtemp")?,
        }))
    }

    /// Reads whether the hot water output is off, on holiday, on or idle.
    ///
    /// Fails with `NotPresent` on models without hot water control.
    pub async fn read_water_state<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
    ) -> Result<WaterState> {
        if !self.is_hot_water() {
            return Err(ValidationError::NotPresent("hotwaterdemand".to_string()).into());
        }
        self.read_fields(client, &WATER_STATE_FIELDS, MaxAge::Default).await?;
        Ok(classify_water(
            self.require_int("onoff")?,
            self.require_int("holidayhours")?,
            self.require_int("hotwaterdemand")?,
        ))
    }

    /// Sensor selection from the cached `sensorsavaliable`.
    pub fn air_sensor(&self) -> Option<AirSensor> {
        self.int_value("sensorsavaliable")
            .and_then(AirSensor::from_sensors)
    }

    /// Air temperature in degrees from whichever sensor the thermostat uses.
    pub async fn read_air_temp<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<f64> {
        let sensors = self
            .read_field(client, "sensorsavaliable", MaxAge::Default)
            .await?
            .as_int()
            .unwrap_or(u16::MAX);
        let sensor = AirSensor::from_sensors(sensors).ok_or_else(|| FieldError::Unexpected {
            field: "sensorsavaliable".into(),
            expected: HM_SENSORS_INT_ONLY,
            actual: sensors,
        })?;
        let max_age = match self.config().max_age_temp_secs {
            Some(secs) => MaxAge::Within(Duration::from_secs(secs)),
            None => MaxAge::Default,
        };
        self.read_field(client, sensor.field(), max_age).await?;
        self.scaled_value(sensor.field())
            .ok_or_else(|| ValidationError::NotRead(sensor.field().to_string()).into())
    }

    async fn hold_free<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<bool> {
        let held = self
            .read_field(client, "tempholdmins", MaxAge::Default)
            .await?
            .as_int()
            .unwrap_or_default();
        if held != 0 {
            warn!("C{} temp hold applied, leaving set point alone", self.address());
        }
        Ok(held == 0)
    }

    /// Overrides the set point until the next program change, unless a hold is active.
    pub async fn set_temp<P: BusPort>(&mut self, client: &mut ProtocolClient<P>, temp: u16) -> Result<bool> {
        if !self.hold_free(client).await? {
            return Ok(false);
        }
        self.set_field(client, "setroomtemp", FieldValue::Int(temp)).await?;
        Ok(true)
    }

    /// Returns an override to the program, unless a hold is active.
    pub async fn release_temp<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<bool> {
        if !self.hold_free(client).await? {
            return Ok(false);
        }
        self.set_field(client, "tempholdmins", FieldValue::Int(0)).await?;
        Ok(true)
    }

    /// Holds `temp` for `minutes`.
    pub async fn hold_temp<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        minutes: u16,
        temp: u16,
    ) -> Result<()> {
        // the set point must go first or the hold does not stick
        self.set_field(client, "setroomtemp", FieldValue::Int(temp)).await?;
        self.set_field(client, "tempholdmins", FieldValue::Int(minutes)).await
    }

    pub async fn release_hold_temp<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "tempholdmins", FieldValue::Int(0)).await
    }

    pub async fn set_holiday<P: BusPort>(&mut self, client: &mut ProtocolClient<P>, hours: u16) -> Result<()> {
        self.set_field(client, "holidayhours", FieldValue::Int(hours)).await
    }

    pub async fn release_holiday<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "holidayhours", FieldValue::Int(0)).await
    }

    pub async fn set_on<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "onoff", FieldValue::Int(HM_ONOFF_ON)).await
    }

    pub async fn set_off<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "onoff", FieldValue::Int(HM_ONOFF_OFF)).await
    }

    pub async fn set_heat<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "runmode", FieldValue::Int(HM_RUNMODE_HEAT)).await
    }

    pub async fn set_frost<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "runmode", FieldValue::Int(HM_RUNMODE_FROST)).await
    }

    pub async fn set_lock<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "keylock", FieldValue::Int(HM_KEYLOCK_ON)).await
    }

    pub async fn set_unlock<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        self.set_field(client, "keylock", FieldValue::Int(HM_KEYLOCK_OFF)).await
    }

    pub async fn set_hot_water<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        demand: HotWaterDemand,
    ) -> Result<()> {
        self.set_field(client, "hotwaterdemand", FieldValue::Int(demand.code())).await
    }

    /// Writes a heating schedule, padding unused slots.
    pub async fn set_heating_schedule<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        day: &str,
        entries: &[u8],
    ) -> Result<()> {
        let length = self.table().get(self.table().lookup(day)?).length;
        self.set_field(client, day, FieldValue::Raw(pad_schedule(entries, length, false)))
            .await
    }

    /// Writes a water schedule, padding unused slots; `"all"` writes every day.
    pub async fn set_water_schedule<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        day: &str,
        entries: &[u8],
    ) -> Result<()> {
        if day == "all" {
            let padded = pad_schedule(entries, 16, true);
            let values: Vec<(&str, FieldValue)> = WATER_DAYS
                .iter()
                .map(|d| (*d, FieldValue::Raw(padded.clone())))
                .collect();
            return self.set_fields(client, &values).await;
        }
        let length = self.table().get(self.table().lookup(day)?).length;
        self.set_field(client, day, FieldValue::Raw(pad_schedule(entries, length, true)))
            .await
    }
}
