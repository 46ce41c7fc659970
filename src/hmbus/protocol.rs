//! # Heatmiser Protocol Client
//!
//! This module turns the raw transport into read and write transactions.
//! Each transaction is retried as a whole on a bad or missing reply, up to
//! the attempt budget in [`BusConfig`]; serial port faults are returned at
//! once. After a checksum failure the receive buffer is flushed so that the
//! tail of an over-long reply cannot be mistaken for the next answer.
//!
//! Only one `ProtocolClient` exists per bus and every operation borrows it
//! mutably, so transactions never overlap.

use crate::config::BusConfig;
use crate::constants::*;
use crate::dcb::field::{FieldDescriptor, FieldValue};
use crate::error::{ConfigError, FrameError, HeatmiserError, ProtocolError, Result};
use crate::hmbus::frame::{decode_reply, is_broadcast, Function, Protocol, RequestFrame};
use crate::hmbus::serial::{BusPort, Transport};
use log::{debug, info, warn};

pub struct ProtocolClient<P: BusPort> {
    transport: Transport<P>,
}

impl ProtocolClient<tokio_serial::SerialStream> {
    /// Opens the serial port and builds a client on it.
    pub fn connect(port_name: &str, config: BusConfig) -> Result<Self> {
        Ok(ProtocolClient::new(Transport::connect(port_name, config)?))
    }
}

impl<P: BusPort> ProtocolClient<P> {
    pub fn new(transport: Transport<P>) -> Self {
        ProtocolClient { transport }
    }

    pub fn transport(&self) -> &Transport<P> {
        &self.transport
    }

    pub fn config(&self) -> &BusConfig {
        self.transport.config()
    }

    /// Writes `payload` at `address`, waiting for the acknowledgement unless broadcast.
    pub async fn write(
        &mut self,
        destination: u8,
        protocol: Protocol,
        address: u16,
        payload: &[u8],
    ) -> Result<()> {
        let frame = RequestFrame::write(destination, protocol, address, payload.to_vec()).encode();
        let max_attempts = self.config().write_max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.write_once(destination, &frame).await {
                Ok(()) => return Ok(()),
                Err(e) => self.check_retry(e, attempt, max_attempts, "Write").await?,
            }
            attempt += 1;
        }
    }

    async fn write_once(&mut self, destination: u8, frame: &[u8]) -> Result<()> {
        self.transport.send(destination, frame).await?;
        if is_broadcast(destination) {
            return Ok(());
        }
        let raw = self.transport.receive(HM_FRAME_WRITE_RESP_LENGTH).await?;
        decode_reply(&raw, HM_MASTER_ADDR, destination, Function::Write)?;
        Ok(())
    }

    /// Reads `length` bytes from physical offset `start`.
    pub async fn read(
        &mut self,
        destination: u8,
        protocol: Protocol,
        start: u16,
        length: u16,
    ) -> Result<Vec<u8>> {
        let request = RequestFrame::read(destination, protocol, start, length);
        self.read_request(request, length).await
    }

    /// Reads the whole DCB, expected to be `expected_length` bytes long.
    pub async fn read_all(
        &mut self,
        destination: u8,
        protocol: Protocol,
        expected_length: u16,
    ) -> Result<Vec<u8>> {
        let request = RequestFrame::read_all(destination, protocol);
        self.read_request(request, expected_length).await
    }

    async fn read_request(&mut self, request: RequestFrame, expected_length: u16) -> Result<Vec<u8>> {
        if is_broadcast(request.destination) {
            return Err(ConfigError::InvalidAddress(request.destination).into());
        }
        let frame = request.encode();
        let max_attempts = self.config().read_max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.read_once(&request, &frame, expected_length).await {
                Ok(payload) => return Ok(payload),
                Err(e) => self.check_retry(e, attempt, max_attempts, "Read").await?,
            }
            attempt += 1;
        }
    }

    async fn read_once(
        &mut self,
        request: &RequestFrame,
        frame: &[u8],
        expected_length: u16,
    ) -> Result<Vec<u8>> {
        self.transport.send(request.destination, frame).await?;
        let raw = self
            .transport
            .receive(HM_MIN_FRAME_READ_RESP_LENGTH + expected_length as usize)
            .await?;
        let reply = decode_reply(&raw, HM_MASTER_ADDR, request.destination, Function::Read)?;
        if reply.start != request.start {
            return Err(FrameError::Mismatch {
                field: "start",
                expected: request.start,
                received: reply.start,
            }
            .into());
        }
        if reply.length != expected_length {
            return Err(FrameError::Mismatch {
                field: "length",
                expected: expected_length,
                received: reply.length,
            }
            .into());
        }
        debug!(
            "C{} read {} bytes from {}",
            request.destination,
            reply.payload.len(),
            reply.start
        );
        Ok(reply.payload)
    }

    /// Decides whether a failed attempt is retried; returns the final error otherwise.
    async fn check_retry(
        &mut self,
        error: HeatmiserError,
        attempt: u32,
        max_attempts: u32,
        operation: &str,
    ) -> Result<()> {
        if !error.is_retryable() {
            return Err(error);
        }
        if error.is_checksum() {
            self.transport.clear_input().await?;
        }
        if attempt >= max_attempts {
            warn!("{} failed after {} attempts: {}", operation, attempt, error);
            return Err(ProtocolError::Failed {
                attempts: attempt,
                last_cause: Box::new(error),
            }
            .into());
        }
        warn!("{} attempt {} failed: {}, retrying", operation, attempt, error);
        Ok(())
    }

    /// Validates and writes a single field.
    pub async fn set_field(
        &mut self,
        destination: u8,
        protocol: Protocol,
        field: &FieldDescriptor,
        value: &FieldValue,
    ) -> Result<()> {
        let payload = field.encode_write(value)?;
        self.write(destination, protocol, field.address, &payload).await?;
        info!("C{} set field {} to {}", destination, field.name, value);
        Ok(())
    }

    /// Validates every field, then writes them with one write per contiguous run.
    pub async fn set_fields(
        &mut self,
        destination: u8,
        protocol: Protocol,
        fields: &[(&FieldDescriptor, FieldValue)],
    ) -> Result<()> {
        let mut encoded = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            encoded.push((field.address, field.encode_write(value)?));
        }
        encoded.sort_by_key(|(address, _)| *address);

        let mut runs: Vec<(u16, Vec<u8>)> = Vec::new();
        for (address, bytes) in encoded {
            match runs.last_mut() {
                Some((start, run)) if *start as usize + run.len() == address as usize => {
                    run.extend(bytes)
                }
                _ => runs.push((address, bytes)),
            }
        }
        for (start, payload) in runs {
            self.write(destination, protocol, start, &payload).await?;
        }
        let names: Vec<&str> = fields.iter().map(|(f, _)| f.name.as_str()).collect();
        info!("C{} set fields {}", destination, names.join(", "));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, ValidationError};
    use crate::hmbus::frame::ReplyFrame;
    use crate::hmbus::serial_mock::MockSerialPort;
    use std::io;
    use std::time::Duration;
    use tokio::time::Instant;

    fn client(mock: &MockSerialPort) -> ProtocolClient<MockSerialPort> {
        ProtocolClient::new(Transport::new(mock.clone(), BusConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_acknowledged() {
        let mock = MockSerialPort::new();
        mock.queue_frame(&ReplyFrame::write_ack(3));
        let mut c = client(&mock);
        c.write(3, Protocol::V3, 18, &[21]).await.unwrap();
        assert_eq!(mock.sent_frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_gives_up_after_three_attempts() {
        let mock = MockSerialPort::new();
        let mut c = client(&mock);
        let err = c.write(3, Protocol::V3, 18, &[21]).await.unwrap_err();
        match err {
            HeatmiserError::Protocol(ProtocolError::Failed { attempts, last_cause }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last_cause,
                    HeatmiserError::Transport(TransportError::NoResponse)
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(mock.sent_frames().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_gives_up_after_two_attempts() {
        let mock = MockSerialPort::new();
        let mut c = client(&mock);
        let err = c.read(3, Protocol::V3, 0, 4).await.unwrap_err();
        assert!(matches!(
            err,
            HeatmiserError::Protocol(ProtocolError::Failed { attempts: 2, .. })
        ));
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_error_not_retried() {
        let mock = MockSerialPort::new();
        mock.set_next_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let mut c = client(&mock);
        let err = c.write(3, Protocol::V3, 18, &[21]).await.unwrap_err();
        assert!(matches!(
            err,
            HeatmiserError::Transport(TransportError::Io(_))
        ));
        assert!(mock.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checksum_failure_clears_input_then_retries() {
        let mock = MockSerialPort::new();
        let mut bad = ReplyFrame::write_ack(3).encode();
        bad[3] ^= 0x40;
        bad.extend([0xEE, 0xEE, 0xEE]);
        mock.queue_reply(bad);
        mock.queue_frame(&ReplyFrame::write_ack(3));

        let mut c = client(&mock);
        let started = Instant::now();
        c.write(3, Protocol::V3, 18, &[21]).await.unwrap();
        assert_eq!(mock.sent_frames().len(), 2);
        assert_eq!(mock.pending_rx(), 0);
        assert!(Instant::now() - started >= BusConfig::default().timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_write_needs_no_ack() {
        let mock = MockSerialPort::new();
        let mut c = client(&mock);
        c.write(HM_BROADCAST_ADDR, Protocol::V3, 21, &[1]).await.unwrap();
        assert_eq!(mock.sent_frames().len(), 1);
        assert!(c.transport().next_send_allowed() >= Instant::now() + Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_returns_payload() {
        let mock = MockSerialPort::new();
        mock.queue_frame(&ReplyFrame::read_reply(5, 18, vec![21, 30]));
        let mut c = client(&mock);
        let data = c.read(5, Protocol::V3, 18, 2).await.unwrap();
        assert_eq!(data, vec![21, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_wrong_start_retried() {
        let mock = MockSerialPort::new();
        mock.queue_frame(&ReplyFrame::read_reply(5, 17, vec![21, 30]));
        mock.queue_frame(&ReplyFrame::read_reply(5, 18, vec![21, 30]));
        let mut c = client(&mock);
        assert_eq!(c.read(5, Protocol::V3, 18, 2).await.unwrap(), vec![21, 30]);
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_all_request_bytes() {
        let mock = MockSerialPort::new();
        mock.queue_frame(&ReplyFrame::read_reply(1, 0, vec![0; 4]));
        let mut c = client(&mock);
        c.read_all(1, Protocol::V3, 4).await.unwrap();
        assert_eq!(
            mock.sent_frames()[0],
            vec![0x01, 0x0A, 0x81, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x2C, 0x09]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_field_validates_before_sending() {
        let mock = MockSerialPort::new();
        let mut c = client(&mock);
        let field = FieldDescriptor::new("setroomtemp", 18, 1, Duration::from_secs(60))
            .with_range(5, 35)
            .writable();
        let err = c
            .set_field(3, Protocol::V3, &field, &FieldValue::Int(40))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HeatmiserError::Validation(ValidationError::OutOfRange { value: 40, .. })
        ));
        assert!(mock.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_fields_merges_adjacent() {
        let mock = MockSerialPort::new();
        mock.queue_frame(&ReplyFrame::write_ack(3));
        mock.queue_frame(&ReplyFrame::write_ack(3));
        let age = Duration::from_secs(60);
        let onoff = FieldDescriptor::new("onoff", 21, 1, age).writable();
        let keylock = FieldDescriptor::new("keylock", 22, 1, age).writable();
        let hold = FieldDescriptor::new("tempholdmins", 26, 2, age).writable();

        let mut c = client(&mock);
        c.set_fields(
            3,
            Protocol::V3,
            &[
                (&keylock, FieldValue::Int(1)),
                (&onoff, FieldValue::Int(1)),
                (&hold, FieldValue::Int(0x0102)),
            ],
        )
        .await
        .unwrap();

        let sent = mock.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][4..10], &[21, 0, 2, 0, 1, 1]);
        assert_eq!(&sent[1][4..10], &[26, 0, 2, 0, 0x02, 0x01]);
    }
}
