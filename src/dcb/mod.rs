//! # Device Control Block
//!
//! Everything that describes and caches a thermostat's memory: the field
//! table, the model-specific address maps, the read planner and the
//! freshness cache. None of it touches the bus.

pub mod address_map;
pub mod cache;
pub mod field;
pub mod models;
pub mod planner;

pub use address_map::AddressMap;
pub use cache::{DecodeChecks, MaxAge, MemoryScheduleStore, ScheduleStore, Snapshot};
pub use field::{FieldDescriptor, FieldId, FieldTable, FieldValue};
pub use models::{Capabilities, DeviceModel, ProgramMode};
pub use planner::{Planner, ReadBlock, ReadPlan};
