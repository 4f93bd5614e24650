use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};
use thiserror::Error;

use super::{Opcode, Payload, ProtocolError, Request, Response, ResponseDecoder};

pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("block {index}: no value seen {successive} times in a row")]
    Inconsistent { index: u8, successive: usize },
    #[error("block {index}: wrote {expected:#010x}, read back {got:#010x}")]
    Mismatch { index: u8, expected: u32, got: u32 },
}

/// When to trust a block value. Each round reads up to `attempts` times and
/// accepts a value once the last `successive` reads agree on it; a fresh
/// round starts with an empty history, up to `rounds` rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub successive: usize,
    pub attempts: usize,
    pub rounds: usize,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            successive: 1,
            attempts: 1,
            rounds: 1,
        }
    }
}

/// Host end of a link. Sends one request at a time and waits for the matching
/// response, retrying on timeouts and corrupted answers.
pub struct Master<P> {
    port: P,
    retries: usize,
    checksum: bool,
    response_timeout: Duration,
    policy: ReadPolicy,
}

impl<P: Read + Write> Master<P> {
    pub fn new(port: P, retries: usize, checksum: bool) -> Self {
        Self {
            port,
            retries,
            checksum,
            response_timeout: RESPONSE_TIMEOUT,
            policy: ReadPolicy::default(),
        }
    }

    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    pub fn read(&mut self, target: u8, index: u8) -> Result<u32> {
        match self.transact(Request::Read { target, index })? {
            Response::Value(bytes) => Ok(u32::from_le_bytes(bytes)),
            _ => Err(ProtocolError::BadPacket.into()),
        }
    }

    pub fn write(&mut self, target: u8, index: u8, data: &[u8]) -> Result<()> {
        let payload = Payload::from_slice(data)?;
        match self.transact(Request::Write {
            target,
            index,
            payload,
        })? {
            Response::Ack => Ok(()),
            _ => Err(ProtocolError::BadPacket.into()),
        }
    }

    /// Reads a block until the configured [`ReadPolicy`] is satisfied.
    pub fn read_consistent(&mut self, target: u8, index: u8) -> Result<u32> {
        let ReadPolicy {
            successive,
            attempts,
            rounds,
        } = self.policy;
        let successive = successive.max(1);
        let mut tail = VecDeque::with_capacity(successive);

        for _ in 0..rounds.max(1) {
            tail.clear();
            for _ in 0..attempts.max(1) {
                let value = self.read(target, index)?;
                if tail.len() == successive {
                    tail.pop_front();
                }
                tail.push_back(value);
                if tail.iter().filter(|&&v| v == value).count() == successive {
                    return Ok(value);
                }
                debug!("block {}: {:#010x} not settled yet", index, value);
            }
        }

        Err(VerifyError::Inconsistent { index, successive }.into())
    }

    /// Writes a block, then reads it back under the [`ReadPolicy`] and
    /// compares.
    pub fn write_verified(&mut self, target: u8, index: u8, data: &[u8]) -> Result<()> {
        let expected = Payload::from_slice(data)?.to_u32();
        self.write(target, index, data)?;

        let got = self.read_consistent(target, index)?;
        if got != expected {
            warn!("block {} did not take {:#010x}", index, expected);
            return Err(VerifyError::Mismatch {
                index,
                expected,
                got,
            }
            .into());
        }
        Ok(())
    }

    pub fn read_blocks(&mut self, target: u8, indexes: &[u8]) -> Result<Vec<u32>> {
        indexes
            .iter()
            .map(|&index| self.read_consistent(target, index))
            .collect()
    }

    /// Writes the same value to every block in `indexes`, stopping at the
    /// first failure.
    pub fn write_blocks(
        &mut self,
        target: u8,
        indexes: &[u8],
        data: &[u8],
        verify: bool,
    ) -> Result<()> {
        for &index in indexes {
            if verify {
                self.write_verified(target, index, data)?;
            } else {
                self.write(target, index, data)?;
            }
        }
        Ok(())
    }

    pub fn check_presence(&mut self, target: u8, index: u8) -> Result<bool> {
        match self.transact(Request::CheckPresence { target, index })? {
            Response::Presence(present) => Ok(present),
            _ => Err(ProtocolError::BadPacket.into()),
        }
    }

    pub fn read_uid(&mut self, target: u8, index: u8) -> Result<Vec<u8>> {
        match self.transact(Request::ReadUid { target, index })? {
            Response::Uid(uid) => Ok(uid),
            _ => Err(ProtocolError::BadPacket.into()),
        }
    }

    fn transact(&mut self, request: Request) -> Result<Response> {
        let frame = request.encode(self.checksum)?;
        let mut error = None;

        for _ in 0..=self.retries {
            match self.exchange(&frame, request.opcode()) {
                Ok(Response::Failure(e)) => return Err(ProtocolError::Status(e).into()),
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!("{}: {:#}", request, e);
                    error = Some(e);
                }
            }
        }

        Err(error.unwrap_or_else(|| ProtocolError::TimedOut.into()))
    }

    fn exchange(&mut self, frame: &[u8], opcode: Opcode) -> Result<Response> {
        debug!("send {:02X?}", frame);
        self.port.write_all(frame)?;
        self.port.flush()?;

        let mut decoder = ResponseDecoder::new(self.checksum);
        let deadline = Instant::now() + self.response_timeout;
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {
                    if let Some(result) = decoder.push(byte[0]) {
                        let answer = result?;
                        debug!("recv {:?}", answer);
                        if answer.opcode != opcode {
                            return Err(ProtocolError::OpcodeMismatch {
                                expected: opcode,
                                got: answer.opcode,
                            }
                            .into());
                        }
                        return Ok(answer.response);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProtocolError::TimedOut.into())
    }
}
