//! End-to-end tests of a device over the mock bus, using a full PRT-HW DCB
//! captured from a thermostat.

mod common;

use chrono::{Duration as ChronoDuration, Local};
use common::*;
use heatmiser_rs::dcb::ScheduleStore;
use heatmiser_rs::error::{HeatmiserError, TimeError};
use heatmiser_rs::hmbus::frame::ReplyFrame;
use heatmiser_rs::{ClockConfig, FieldValue, MaxAge, MockSerialPort, TempState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tests that a full read decodes every field of the captured DCB.
#[tokio::test(start_paused = true)]
async fn test_read_all_decodes_fixture() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    mock.queue_frame(&read_all_reply(dcb_now()));

    let errors = dev.read_all(&mut c).await.unwrap();
    assert!(errors.is_empty(), "unexpected field errors {:?}", errors);

    let sent = mock.sent_frames();
    assert_eq!(sent, vec![vec![0x01, 0x0A, 0x81, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x2C, 0x09]]);

    assert_eq!(dev.int_value("DCBlen"), Some(293));
    assert_eq!(dev.int_value("model"), Some(4));
    assert_eq!(dev.int_value("programmode"), Some(1));
    assert_eq!(dev.int_value("address"), Some(1));
    assert_eq!(dev.int_value("frosttemp"), Some(9));
    assert_eq!(dev.int_value("setroomtemp"), Some(12));
    assert_eq!(dev.int_value("onoff"), Some(1));
    assert_eq!(dev.int_value("remoteairtemp"), Some(65535));
    assert_eq!(dev.scaled_value("airtemp"), Some(22.0));
    assert_eq!(dev.int_value("hotwaterdemand"), Some(0));
    assert_eq!(dev.floor_limiting(), None);
    assert_eq!(
        dev.value("wend_water"),
        Some(&FieldValue::Raw(vec![8, 0, 9, 0, 18, 0, 19, 0, 24, 0, 24, 0, 24, 0, 24, 0]))
    );
    assert_eq!(dev.raw_data().len(), 293);
    assert_eq!(dev.raw_range("setroomtemp", "onoff").unwrap(), &[12, 28, 1]);
}

/// Tests that decoded schedules reach the schedule store.
#[tokio::test(start_paused = true)]
async fn test_schedules_stored() {
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<HashMap<String, Vec<u8>>>>);

    impl ScheduleStore for Shared {
        fn store(&mut self, name: &str, bytes: &[u8]) {
            self.0.lock().unwrap().insert(name.to_string(), bytes.to_vec());
        }

        fn load(&self, name: &str) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(name).cloned()
        }
    }

    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let store = Shared::default();
    let mut dev = prt_hw(ClockConfig::default()).with_schedule_store(Box::new(store.clone()));
    mock.queue_frame(&read_all_reply(dcb_now()));
    dev.read_all(&mut c).await.unwrap();

    let sun_water = dev.schedules().load("sun_water");
    let saved = store.0.lock().unwrap();
    assert_eq!(saved.len(), 18);
    assert_eq!(saved["wed_heat"], vec![7, 0, 19, 8, 30, 12, 16, 30, 20, 21, 0, 12]);
    assert_eq!(sun_water, saved.get("sun_water").cloned());
}

/// Tests that cached values answer later requests without touching the bus.
#[tokio::test(start_paused = true)]
async fn test_cached_after_read_all() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    mock.queue_frame(&read_all_reply(dcb_now()));
    dev.read_all(&mut c).await.unwrap();

    assert_eq!(dev.read_air_temp(&mut c).await.unwrap(), 22.0);
    assert_eq!(
        dev.read_temp_state(&mut c).await.unwrap(),
        TempState::Program { temp: 12 }
    );
    let values = dev
        .read_fields(&mut c, &["frosttemp", "keylock"], MaxAge::Default)
        .await
        .unwrap();
    assert_eq!(values, vec![Some(FieldValue::Int(9)), Some(FieldValue::Int(0))]);
    assert_eq!(mock.sent_frames().len(), 1);
}

/// Tests that asking for the whole range is served by a single read-all.
#[tokio::test(start_paused = true)]
async fn test_whole_range_reads_all() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    mock.queue_frame(&read_all_reply(dcb_now()));

    let errors = dev.get_field_range(&mut c, "DCBlen", "sun_water").await.unwrap();
    assert!(errors.is_empty());
    let sent = mock.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][4..8], &[0x00, 0x00, 0xFF, 0xFF]);
}

/// Tests that a drifting clock is reported while the data is still kept.
#[tokio::test(start_paused = true)]
async fn test_clock_drift_reported() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    let ahead = Local::now() + ChronoDuration::seconds(300);
    mock.queue_frame(&read_all_reply(dcb_at(&ahead)));

    let err = dev.read_all(&mut c).await.unwrap_err();
    assert!(matches!(err, HeatmiserError::Time(TimeError::Drift { .. })), "{err}");
    assert_eq!(dev.int_value("setroomtemp"), Some(12));
    assert_eq!(mock.sent_frames().len(), 1);
}

/// Tests that a clock days out is reported as the wrong day.
#[tokio::test(start_paused = true)]
async fn test_clock_wrong_day() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    let later = Local::now() + ChronoDuration::days(2);
    mock.queue_frame(&read_all_reply(dcb_at(&later)));

    let err = dev.read_all(&mut c).await.unwrap_err();
    assert!(matches!(err, HeatmiserError::Time(TimeError::WrongDay { .. })), "{err}");
}

/// Tests that auto correction writes local time back to the device.
#[tokio::test(start_paused = true)]
async fn test_clock_auto_corrected() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig {
        auto_correct: true,
        ..ClockConfig::default()
    });
    let behind = Local::now() - ChronoDuration::seconds(600);
    mock.queue_frame(&read_all_reply(dcb_at(&behind)));
    mock.queue_frame(&ReplyFrame::write_ack(1));

    dev.read_all(&mut c).await.unwrap();
    let sent = mock.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1][3], 0x01);
    assert_eq!(u16::from_le_bytes([sent[1][4], sent[1][5]]), 37);
    assert_eq!(u16::from_le_bytes([sent[1][6], sent[1][7]]), 4);
    assert!(dev.check_clock().is_ok());
}

/// Tests that a stale field is fetched with a targeted read.
#[tokio::test(start_paused = true)]
async fn test_stale_field_refetched() {
    let mock = MockSerialPort::new();
    let mut c = client(&mock);
    let mut dev = prt_hw(ClockConfig::default());
    mock.queue_frame(&read_all_reply(dcb_now()));
    dev.read_all(&mut c).await.unwrap();

    mock.queue_frame(&ReplyFrame::read_reply(1, 32, vec![0, 215]));
    let value = dev.read_field(&mut c, "airtemp", MaxAge::Always).await.unwrap();
    assert_eq!(value, FieldValue::Int(215));
    let sent = mock.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[1][4..8], &[32, 0, 2, 0]);
}
