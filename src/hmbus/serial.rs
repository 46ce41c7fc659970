//! # Heatmiser Bus Transport
//!
//! This module owns the serial channel of the RS485 bus. It opens the port
//! with the fixed line settings, keeps the bus idle for the settle interval
//! between transactions, writes frames and collects replies within bounded
//! timeouts.
//!
//! The transport is generic over [`BusPort`] so that tests can drive it with
//! a [`MockSerialPort`](crate::hmbus::serial_mock::MockSerialPort).

use crate::config::BusConfig;
use crate::error::TransportError;
use crate::hmbus::frame::is_broadcast;
use crate::util::hex::format_hex_compact;
use log::{debug, warn};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tokio_serial::SerialPortBuilderExt;

/// Byte stream of a bus connection.
pub trait BusPort: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drops everything received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl BusPort for tokio_serial::SerialStream {
    fn discard_input(&mut self) -> io::Result<()> {
        tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Opens `port_name` with the Heatmiser line settings (8 data bits, no parity, one stop bit).
pub fn open_port(port_name: &str, config: &BusConfig) -> Result<tokio_serial::SerialStream, TransportError> {
    let port = tokio_serial::new(port_name, config.baudrate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .timeout(config.timeout)
        .open_native_async()
        .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    debug!(
        "Opened {} at {} baud, 8N1, timeout {:?}",
        port_name, config.baudrate, config.timeout
    );
    Ok(port)
}

/// Single owner of the shared bus.
pub struct Transport<P: BusPort> {
    port: P,
    config: BusConfig,
    /// Earliest instant the next transmission may start.
    next_send: Instant,
}

impl Transport<tokio_serial::SerialStream> {
    /// Opens a serial port and wraps it.
    pub fn connect(port_name: &str, config: BusConfig) -> Result<Self, TransportError> {
        let port = open_port(port_name, &config)?;
        Ok(Transport::new(port, config))
    }
}

impl<P: BusPort> Transport<P> {
    /// Wraps an open port. The first send does not wait.
    pub fn new(port: P, config: BusConfig) -> Self {
        Transport {
            port,
            config,
            next_send: Instant::now(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Earliest instant the next send may start.
    pub fn next_send_allowed(&self) -> Instant {
        self.next_send
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Waits out the settle interval and writes `frame` to `destination`.
    pub async fn send(&mut self, destination: u8, frame: &[u8]) -> Result<(), TransportError> {
        let now = Instant::now();
        if self.next_send > now {
            debug!("Waiting {:?} for the bus to settle", self.next_send - now);
            sleep_until(self.next_send).await;
        }

        let written = match timeout(self.config.timeout, self.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout")),
        };
        if let Err(e) = written {
            warn!("Write error: {}, sending {}", e, format_hex_compact(frame));
            return Err(TransportError::Io(e));
        }
        debug!("Sent {}", format_hex_compact(frame));

        if is_broadcast(destination) {
            // nobody answers a broadcast, but every device needs time to act on it
            self.next_send = Instant::now() + self.config.send_min_time;
        }
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame).await?;
        self.port.flush().await
    }

    /// Collects up to `expected_length` reply bytes.
    ///
    /// Fails with `NoResponse` when nothing arrives within the start timeout.
    /// A reply that stops early is returned short and left to the codec.
    pub async fn receive(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        let result = self.receive_inner(expected_length).await;
        self.next_send = Instant::now() + self.config.bus_settle_time;
        result
    }

    async fn receive_inner(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        debug!("Listening for {} bytes", expected_length);
        let mut buf = vec![0u8; expected_length.max(1)];

        let started = Instant::now();
        let first = match timeout(self.config.start_timeout, self.port.read(&mut buf[..1])).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Serial port error: {}", e);
                return Err(TransportError::Io(e));
            }
            Err(_) => 0,
        };
        if first == 0 {
            return Err(TransportError::NoResponse);
        }
        let first_wait = started.elapsed();
        debug!("Waited {:?} for first byte", first_wait);

        let remaining = self
            .config
            .timeout
            .saturating_sub(first_wait)
            .max(self.config.min_timeout);
        let deadline = Instant::now() + remaining;

        let mut filled = 1;
        while filled < expected_length {
            match timeout_at(deadline, self.port.read(&mut buf[filled..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => {
                    warn!("Serial port error: {}", e);
                    return Err(TransportError::Io(e));
                }
            }
        }
        buf.truncate(filled);
        debug!("Received {}", format_hex_compact(&buf));
        Ok(buf)
    }

    /// Discards a possibly over-long reply after a CRC failure.
    ///
    /// Sleeps a full timeout first so the device has finished sending.
    pub async fn clear_input(&mut self) -> Result<(), TransportError> {
        sleep(self.config.timeout).await;
        self.port.discard_input().map_err(|e| {
            warn!("Failed to clear input buffer");
            TransportError::Io(e)
        })?;
        warn!("Input buffer cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmbus::serial_mock::MockSerialPort;
    use std::time::Duration;

    fn transport(mock: &MockSerialPort) -> Transport<MockSerialPort> {
        Transport::new(mock.clone(), BusConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_frame() {
        let mock = MockSerialPort::new();
        let mut t = transport(&mock);
        t.send(1, &[1, 2, 3]).await.unwrap();
        assert_eq!(mock.sent_frames(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_without_data_is_no_response() {
        let mock = MockSerialPort::new();
        let mut t = transport(&mock);
        let err = t.receive(7).await.unwrap_err();
        assert!(matches!(err, TransportError::NoResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_records_time_on_failure() {
        let mock = MockSerialPort::new();
        let mut t = transport(&mock);
        let before = Instant::now();
        let _ = t.receive(7).await;
        assert!(t.next_send_allowed() >= before + BusConfig::default().bus_settle_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_returns_short_reply() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(&[1, 2, 3]);
        let mut t = transport(&mock);
        assert_eq!(t.receive(7).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_byte_after_start_timeout_is_no_response() {
        let mock = MockSerialPort::new();
        mock.queue_delayed_reply(vec![(Duration::from_millis(150), vec![0x81, 7, 0])]);
        let mut t = transport(&mock);
        t.send(1, &[1]).await.unwrap();
        let start = Instant::now();

        let err = t.receive(7).await.unwrap_err();
        assert!(matches!(err, TransportError::NoResponse));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_byte_within_start_timeout() {
        let mock = MockSerialPort::new();
        mock.queue_delayed_reply(vec![
            (Duration::from_millis(90), vec![0x81]),
            (Duration::from_millis(300), vec![7, 0]),
        ]);
        let mut t = transport(&mock);
        t.send(1, &[1]).await.unwrap();
        assert_eq!(t.receive(3).await.unwrap(), vec![0x81, 7, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tail_cut_at_full_timeout() {
        let mock = MockSerialPort::new();
        mock.queue_delayed_reply(vec![
            (Duration::from_millis(50), vec![1]),
            (Duration::from_millis(700), vec![2, 3]),
            (Duration::from_millis(900), vec![4, 5, 6, 7]),
        ]);
        let mut t = transport(&mock);
        t.send(1, &[1]).await.unwrap();
        let start = Instant::now();

        // 50 ms for the first byte leaves 750 ms for the rest
        assert_eq!(t.receive(7).await.unwrap(), vec![1, 2, 3]);
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tail_gets_min_timeout() {
        let mock = MockSerialPort::new();
        mock.queue_delayed_reply(vec![
            (Duration::from_millis(95), vec![1]),
            (Duration::from_millis(180), vec![2]),
            (Duration::from_millis(220), vec![3]),
        ]);
        let config = BusConfig {
            timeout: Duration::from_millis(150),
            start_timeout: Duration::from_millis(100),
            min_timeout: Duration::from_millis(100),
            ..BusConfig::default()
        };
        let mut t = Transport::new(mock.clone(), config);
        t.send(1, &[1]).await.unwrap();
        let start = Instant::now();

        // 150 - 95 is below the floor, so the tail may run until 195 ms
        assert_eq!(t.receive(3).await.unwrap(), vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(195));
        assert!(start.elapsed() < Duration::from_millis(220));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_settle() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(&[0xAA]);
        let mut t = transport(&mock);
        t.receive(1).await.unwrap();
        let received_at = Instant::now();
        t.send(1, &[0]).await.unwrap();
        assert!(Instant::now() - received_at >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_input_discards_tail() {
        let mock = MockSerialPort::new();
        mock.queue_rx_data(&[9, 9, 9]);
        let mut t = transport(&mock);
        t.clear_input().await.unwrap();
        assert_eq!(mock.pending_rx(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_is_io() {
        let mock = MockSerialPort::new();
        mock.set_next_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        let mut t = transport(&mock);
        let err = t.send(1, &[1]).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
