//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Local};
use heatmiser_rs::clock::WeekTime;
use heatmiser_rs::hmbus::frame::ReplyFrame;
use heatmiser_rs::{
    BusConfig, ClockConfig, Device, DeviceConfig, DeviceModel, MockSerialPort, ProgramMode,
    ProtocolClient, TimingModel, Transport,
};

/// Full DCB of a PRT-HW at address 1 in 7 day mode.
pub const PRT_HW_DAY_DCB: [u8; 293] = [
    1, 37, 0, 22, 4, 0, 1, 0, 0, 0, 0, 1, 0, 0, 1, 38,
    1, 9, 12, 28, 1, 1, 0, 0, 0, 0, 0, 0, 255, 255, 255, 255,
    0, 220, 0, 0, 0, 3, 14, 49, 36, 7, 0, 19, 9, 30, 10, 17,
    0, 19, 21, 30, 10, 7, 0, 19, 21, 30, 10, 24, 0, 5, 24, 0,
    5, 24, 0, 24, 0, 24, 0, 24, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 8, 0, 9, 0, 18, 0, 19, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 7, 0, 20, 21, 30, 12, 24, 0, 12, 24, 0, 12, 7, 0, 20,
    21, 30, 12, 24, 0, 12, 24, 0, 12, 7, 0, 19, 8, 30, 12, 16,
    30, 20, 21, 0, 12, 7, 0, 20, 12, 0, 12, 17, 0, 20, 21, 30,
    12, 5, 0, 20, 21, 30, 12, 24, 0, 12, 24, 0, 12, 7, 0, 20,
    12, 0, 12, 17, 0, 20, 21, 30, 12, 7, 0, 12, 24, 0, 12, 24,
    0, 12, 24, 0, 12, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0, 17, 30, 18, 0, 24, 0, 24, 0, 24, 0, 24,
    0, 24, 0, 24, 0,
];

/// Offset of `currenttime` in the PRT-HW DCB.
pub const CLOCK_OFFSET: usize = 37;

/// The fixture with its clock set to `time`.
pub fn dcb_at(time: &DateTime<Local>) -> Vec<u8> {
    let mut dcb = PRT_HW_DAY_DCB.to_vec();
    dcb[CLOCK_OFFSET..CLOCK_OFFSET + 4].copy_from_slice(&WeekTime::from_datetime(time).to_bytes());
    dcb
}

/// The fixture with a clock that agrees with local time.
pub fn dcb_now() -> Vec<u8> {
    dcb_at(&Local::now())
}

pub fn client(mock: &MockSerialPort) -> ProtocolClient<MockSerialPort> {
    ProtocolClient::new(Transport::new(mock.clone(), BusConfig::default()))
}

pub fn prt_hw(clock: ClockConfig) -> Device {
    Device::new(
        DeviceConfig::new("Kit", 1, DeviceModel::PrtHw, ProgramMode::Day),
        TimingModel::default(),
        clock,
    )
    .unwrap()
}

pub fn prt_e(address: u8) -> Device {
    Device::new(
        DeviceConfig::new("B1", address, DeviceModel::PrtE, ProgramMode::Week),
        TimingModel::default(),
        ClockConfig::default(),
    )
    .unwrap()
}

/// A read-all reply from address 1 carrying `dcb`.
pub fn read_all_reply(dcb: Vec<u8>) -> ReplyFrame {
    ReplyFrame::read_reply(1, 0, dcb)
}
