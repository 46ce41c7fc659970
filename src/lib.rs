//! # heatmiser-rs - Heatmiser V3 Thermostats over RS485
//!
//! The heatmiser-rs crate is a bus master for Heatmiser V3 thermostats sharing
//! a multi-drop RS485 line. Each thermostat exposes a device control block
//! (DCB) whose layout depends on the model and program mode; the crate reads
//! and writes it through a single logical field space.
//!
//! ## Features
//!
//! - Frame encoding and decoding with CRC-16 checking
//! - Bus timing discipline, bounded reply timeouts and per-operation retries
//! - Logical field addresses translated to each model's physical DCB offsets
//! - Read planning that merges requested fields into the cheapest set of reads
//! - A per-field cache with maximum ages, so only stale fields hit the bus
//! - Device clock checking with week wraparound and optional correction
//! - Thermostat operations: set points, holds, holidays, run mode, key lock
//!
//! ## Usage
//!
//! ```rust,no_run
//! use heatmiser_rs::{Device, DeviceConfig, DeviceModel, ProgramMode, ProtocolClient};
//! use heatmiser_rs::{BusConfig, ClockConfig, MaxAge, TimingModel};
//!
//! # async fn run() -> heatmiser_rs::Result<()> {
//! let mut client = ProtocolClient::connect("/dev/ttyUSB0", BusConfig::default())?;
//! let config = DeviceConfig::new("Kitchen", 1, DeviceModel::PrtHw, ProgramMode::Day);
//! let mut kitchen = Device::new(config, TimingModel::default(), ClockConfig::default())?;
//!
//! let temp = kitchen.read_air_temp(&mut client).await?;
//! let set = kitchen.read_field(&mut client, "setroomtemp", MaxAge::Default).await?;
//! println!("{} is {} degrees, set to {}", kitchen.name(), temp, set);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod dcb;
pub mod device;
pub mod error;
pub mod hmbus;
pub mod logging;
pub mod network;
pub mod thermostat;
pub mod util;

pub use crate::config::{BusConfig, ClockConfig, DeviceConfig, NetworkConfig, TimingModel};
pub use crate::error::{
    ConfigError, FieldError, FrameError, HeatmiserError, ProtocolError, Result, TimeError,
    TransportError, ValidationError,
};
pub use crate::logging::{init_logger, log_info};

pub use clock::WeekTime;
pub use dcb::{
    AddressMap, Capabilities, DeviceModel, FieldDescriptor, FieldId, FieldTable, FieldValue, MaxAge,
    Planner, ProgramMode, ReadPlan, ScheduleStore,
};
pub use device::Device;
pub use hmbus::{BusPort, MockSerialPort, ProtocolClient, Transport};
pub use network::{DeviceOp, Network};
pub use thermostat::{
    AirSensor, DisplayEvent, DisplayState, HotWaterDemand, TempState, Thermostat, WaterState,
};
