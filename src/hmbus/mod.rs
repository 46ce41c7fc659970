//! # Heatmiser Bus
//!
//! The wire side of the crate: frame codec, serial transport and the
//! protocol client that adds retries on top of them.

pub mod frame;
pub mod protocol;
pub mod serial;
pub mod serial_mock;

pub use frame::{Function, Protocol, ReplyFrame, RequestFrame};
pub use protocol::ProtocolClient;
pub use serial::{BusPort, Transport};
pub use serial_mock::MockSerialPort;
