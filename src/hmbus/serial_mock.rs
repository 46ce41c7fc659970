//! Mock bus port for testing
//!
//! This module provides a scripted stand-in for the serial port so that the
//! transport, protocol client and devices can be exercised without an RS485
//! adaptor. Every flushed frame is recorded and releases the next scripted
//! reply into the receive buffer, the way a thermostat answers a request.
//! Replies can also be scripted to trickle in over time, which together with
//! tokio's paused clock lets tests observe the receive timeouts.

use crate::hmbus::frame::ReplyFrame;
use crate::hmbus::serial::BusPort;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};

/// What the mock does after a request is flushed.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Silence,
    /// Bytes readable straight away.
    Immediate(Vec<u8>),
    /// Chunks released at the given delay after the flush.
    Delayed(Vec<(Duration, Vec<u8>)>),
}

/// Mock bus port that answers each request from a script
#[derive(Clone)]
pub struct MockSerialPort {
    /// Bytes of the request being written
    pub tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Every request flushed so far
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Bytes available to read
    pub rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Replies released one per request
    pub script: Arc<Mutex<VecDeque<ScriptedReply>>>,
    /// Reply chunks still in flight, in release order
    pub in_flight: Arc<Mutex<VecDeque<(Instant, Vec<u8>)>>>,
    timer: Arc<Mutex<Option<Pin<Box<Sleep>>>>>,
    /// Simulated error for the next read or write
    pub next_error: Arc<Mutex<Option<io::Error>>>,
}

impl Default for MockSerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSerialPort {
    pub fn new() -> Self {
        MockSerialPort {
            tx_buffer: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            rx_buffer: Arc::new(Mutex::new(VecDeque::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(VecDeque::new())),
            timer: Arc::new(Mutex::new(None)),
            next_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Make data readable immediately
    pub fn queue_rx_data(&self, data: &[u8]) {
        lock(&self.rx_buffer).extend(data);
    }

    /// Answer the next unanswered request with raw bytes
    pub fn queue_reply(&self, data: Vec<u8>) {
        lock(&self.script).push_back(ScriptedReply::Immediate(data));
    }

    /// Answer the next unanswered request with chunks that arrive over time.
    ///
    /// Each delay counts from the flush of the request.
    pub fn queue_delayed_reply(&self, chunks: Vec<(Duration, Vec<u8>)>) {
        lock(&self.script).push_back(ScriptedReply::Delayed(chunks));
    }

    /// Answer the next unanswered request with an encoded reply frame
    pub fn queue_frame(&self, frame: &ReplyFrame) {
        self.queue_reply(frame.encode());
    }

    /// Let the next unanswered request go unanswered
    pub fn queue_silence(&self) {
        lock(&self.script).push_back(ScriptedReply::Silence);
    }

    /// Set an error to be returned on the next operation
    pub fn set_next_error(&self, error: io::Error) {
        *lock(&self.next_error) = Some(error);
    }

    /// Requests written so far, one entry per flush
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// Bytes still waiting to be read
    pub fn pending_rx(&self) -> usize {
        lock(&self.rx_buffer).len()
    }

    /// Scripted replies not yet released
    pub fn pending_replies(&self) -> usize {
        lock(&self.script).len()
    }

    /// Clear all buffers and the script
    pub fn clear(&self) {
        lock(&self.tx_buffer).clear();
        lock(&self.sent).clear();
        lock(&self.rx_buffer).clear();
        lock(&self.script).clear();
        lock(&self.in_flight).clear();
    }

    /// Moves due chunks into the receive buffer and returns when the next one is due.
    fn release_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut in_flight = lock(&self.in_flight);
        let mut rx = lock(&self.rx_buffer);
        while let Some((at, _)) = in_flight.front() {
            if *at > now {
                return Some(*at);
            }
            if let Some((_, chunk)) = in_flight.pop_front() {
                rx.extend(chunk);
            }
        }
        None
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BusPort for MockSerialPort {
    fn discard_input(&mut self) -> io::Result<()> {
        lock(&self.rx_buffer).clear();
        Ok(())
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = lock(&self.next_error).take() {
            return Poll::Ready(Err(error));
        }

        loop {
            let next_release = self.release_due();
            {
                // with nothing in flight an empty buffer reads as zero bytes,
                // which the transport treats as silence
                let mut rx = lock(&self.rx_buffer);
                if !rx.is_empty() || next_release.is_none() {
                    let available = rx.len().min(buf.remaining());
                    let data: Vec<u8> = rx.drain(..available).collect();
                    buf.put_slice(&data);
                    return Poll::Ready(Ok(()));
                }
            }
            let Some(at) = next_release else {
                return Poll::Ready(Ok(()));
            };
            let mut timer = lock(&self.timer);
            let sleep = timer.get_or_insert_with(|| Box::pin(sleep_until(at)));
            if sleep.deadline() != at {
                sleep.as_mut().reset(at);
            }
            if sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(error) = lock(&self.next_error).take() {
            return Poll::Ready(Err(error));
        }
        lock(&self.tx_buffer).extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let frame: Vec<u8> = lock(&self.tx_buffer).drain(..).collect();
        if frame.is_empty() {
            return Poll::Ready(Ok(()));
        }
        lock(&self.sent).push(frame);
        match lock(&self.script).pop_front() {
            Some(ScriptedReply::Immediate(reply)) => lock(&self.rx_buffer).extend(reply),
            Some(ScriptedReply::Delayed(chunks)) => {
                let flushed = Instant::now();
                let mut in_flight = lock(&self.in_flight);
                in_flight.extend(chunks.into_iter().map(|(delay, chunk)| (flushed + delay, chunk)));
                in_flight.make_contiguous().sort_by_key(|(at, _)| *at);
            }
            Some(ScriptedReply::Silence) | None => {}
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
