use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use super::packet::HEADER_LEN;
use super::{Packet, Request, END, START};

/// Reasons a frame is discarded. None of them leave the framer; they are
/// logged and counted in [`FramerStats`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("start sentinel inside an open frame")]
    Restarted,
    #[error("frame ended after {0} data bytes")]
    ShortFrame(usize),
    #[error("frame carries no operation")]
    NoOperation,
    #[error("unknown operation code {0:#04x}")]
    BadOpcode(u8),
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("frame open for longer than {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct FramerConfig {
    /// Expect a CRC-8 byte in front of the end sentinel.
    pub checksum: bool,
    /// Discard frames that stay open longer than this.
    pub frame_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    Idle,
    Open,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub completed: usize,
    /// Every discarded frame, checksum failures and timeouts included.
    pub framing_errors: usize,
    pub checksum_errors: usize,
    pub timeouts: usize,
    /// Payload bytes dropped past capacity.
    pub overflows: usize,
    /// Bytes ignored outside of a frame.
    pub noise: usize,
}

/// Byte-at-a-time frame parser. Holds the single in-flight [`Packet`];
/// completed frames leave it as [`Request`] values, either returned from
/// [`Framer::feed`] or queued by [`Framer::ingest`].
pub struct Framer {
    config: FramerConfig,
    state: FramerState,
    packet: Packet,
    // last data byte, held back while it may still turn out to be the checksum
    pending: Option<u8>,
    opened_at: Option<Instant>,
    ready: VecDeque<Request>,
    stats: FramerStats,
}

impl Framer {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            config,
            state: FramerState::Idle,
            packet: Packet::default(),
            pending: None,
            opened_at: None,
            ready: VecDeque::new(),
            stats: FramerStats::default(),
        }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn feed(&mut self, byte: u8) -> Option<Request> {
        let now = self.config.frame_timeout.map(|_| Instant::now());
        self.step(byte, now)
    }

    pub fn feed_at(&mut self, byte: u8, now: Instant) -> Option<Request> {
        self.step(byte, Some(now))
    }

    /// Feeds every byte of `bytes` and queues completed requests for
    /// [`Framer::pop_request`]. Returns how many requests were queued.
    pub fn ingest<I: IntoIterator<Item = u8>>(&mut self, bytes: I) -> usize {
        let mut queued = 0;
        for byte in bytes {
            if let Some(request) = self.feed(byte) {
                self.ready.push_back(request);
                queued += 1;
            }
        }
        queued
    }

    pub fn pop_request(&mut self) -> Option<Request> {
        self.ready.pop_front()
    }

    pub fn pending_requests(&self) -> usize {
        self.ready.len()
    }

    /// Drops an open frame that has outlived the configured timeout. Returns
    /// `true` if a frame was dropped.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        let (timeout, opened_at) = match (self.config.frame_timeout, self.opened_at) {
            (Some(timeout), Some(opened_at)) if self.state == FramerState::Open => {
                (timeout, opened_at)
            }
            _ => return false,
        };

        if now.saturating_duration_since(opened_at) < timeout {
            return false;
        }

        self.stats.timeouts += 1;
        self.discard(FrameError::TimedOut(timeout));
        true
    }

    /// Forgets any open frame without counting it.
    pub fn reset(&mut self) {
        self.packet.reset();
        self.pending = None;
        self.opened_at = None;
        self.state = FramerState::Idle;
    }

    fn step(&mut self, byte: u8, now: Option<Instant>) -> Option<Request> {
        if let Some(now) = now {
            self.poll_timeout(now);
        }

        match (self.state, byte) {
            (FramerState::Idle, START) => {
                self.open(now);
                None
            }
            (FramerState::Idle, _) => {
                self.stats.noise += 1;
                None
            }
            (FramerState::Open, START) => {
                self.discard(FrameError::Restarted);
                self.open(now);
                None
            }
            (FramerState::Open, END) => {
                let result = self.close();
                self.reset();
                match result {
                    Ok(request) => {
                        self.stats.completed += 1;
                        debug!("frame complete: {}", request);
                        Some(request)
                    }
                    Err(e) => {
                        self.count_error(e);
                        None
                    }
                }
            }
            (FramerState::Open, _) => {
                let byte = if self.config.checksum {
                    match self.pending.replace(byte) {
                        Some(held) => held,
                        None => return None,
                    }
                } else {
                    byte
                };

                if !self.packet.push(byte) {
                    self.stats.overflows += 1;
                    debug!("payload full, dropped {:02X}", byte);
                }
                None
            }
        }
    }

    fn open(&mut self, now: Option<Instant>) {
        self.packet.reset();
        self.pending = None;
        self.opened_at = now;
        self.state = FramerState::Open;
    }

    fn close(&mut self) -> Result<Request, FrameError> {
        if self.config.checksum {
            let held = self.pending.take();
            let received = match held {
                Some(byte) if self.packet.position() >= HEADER_LEN => byte,
                _ => {
                    let seen = self.packet.position() + usize::from(held.is_some());
                    return Err(FrameError::ShortFrame(seen));
                }
            };
            let computed = self.packet.checksum();
            if computed != received {
                self.stats.checksum_errors += 1;
                return Err(FrameError::ChecksumMismatch { computed, received });
            }
        }

        let request = Request::try_from(&self.packet)?;
        self.packet.completed = true;
        Ok(request)
    }

    fn discard(&mut self, error: FrameError) {
        self.count_error(error);
        self.reset();
    }

    fn count_error(&mut self, error: FrameError) {
        self.stats.framing_errors += 1;
        warn!("frame discarded: {}", error);
    }
}

impl Default for Framer {
    fn default() -> Self {
        Framer::new(FramerConfig::default())
    }
}
