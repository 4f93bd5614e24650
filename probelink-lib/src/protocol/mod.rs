mod framer;
mod packet;
mod response;

pub mod master;
pub mod slave;

use std::fmt::Display;

use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

use crate::crc::checksum;

pub use framer::{FrameError, Framer, FramerConfig, FramerState, FramerStats};
pub use packet::{Packet, Payload, PAYLOAD_CAPACITY};
pub use response::{Response, ResponseDecoder, ResponseFrame};

/// Start of frame, `'^'`.
pub const START: u8 = 0x5E;
/// End of frame, `'$'`.
pub const END: u8 = 0x24;

pub fn is_sentinel(byte: u8) -> bool {
    byte == START || byte == END
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Opcode {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    CheckPresence = 3,
    ReadUid = 4,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("byte {0:#04x} collides with a frame sentinel")]
    SentinelCollision(u8),
    #[error("payload of {0} bytes exceeds capacity")]
    PayloadTooLong(usize),
    #[error("corrupted response packet")]
    BadPacket,
    #[error("unknown operation code {0:#04x}")]
    UnknownOpcode(u8),
    #[error("response checksum mismatch")]
    ChecksumMismatch,
    #[error("response for {got:?}, expected {expected:?}")]
    OpcodeMismatch { expected: Opcode, got: Opcode },
    #[error("timed out waiting for response")]
    TimedOut,
    #[error("device error: {0}")]
    Status(HandlerError),
}

/// Failure reported by an operation handler. Travels as the status byte of a
/// response frame; codes are picked so that their checksum is never a
/// sentinel. Status 0x00 means success, so `Other(0)` goes out as a device
/// fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    #[error("addressed tag not present")]
    NotPresent,
    #[error("invalid target or index")]
    InvalidAddress,
    #[error("malformed payload")]
    BadPayload,
    #[error("device fault")]
    DeviceFault,
    #[error("response would contain a sentinel byte")]
    Unencodable,
    #[error("status {0:#04x}")]
    Other(u8),
}

impl HandlerError {
    pub fn code(&self) -> u8 {
        match self {
            HandlerError::NotPresent => 0x11,
            HandlerError::InvalidAddress => 0x12,
            HandlerError::BadPayload => 0x13,
            HandlerError::DeviceFault | HandlerError::Other(0x00) => 0x14,
            HandlerError::Unencodable => 0x15,
            HandlerError::Other(code) => *code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x11 => HandlerError::NotPresent,
            0x12 => HandlerError::InvalidAddress,
            0x13 => HandlerError::BadPayload,
            0x14 => HandlerError::DeviceFault,
            0x15 => HandlerError::Unencodable,
            other => HandlerError::Other(other),
        }
    }
}

/// A completed, validated frame. Each operation carries only the fields it
/// uses, so a request for `Opcode::None` cannot be built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Read { target: u8, index: u8 },
    Write { target: u8, index: u8, payload: Payload },
    CheckPresence { target: u8, index: u8 },
    ReadUid { target: u8, index: u8 },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::CheckPresence { .. } => Opcode::CheckPresence,
            Request::ReadUid { .. } => Opcode::ReadUid,
        }
    }

    pub fn target(&self) -> u8 {
        match *self {
            Request::Read { target, .. }
            | Request::Write { target, .. }
            | Request::CheckPresence { target, .. }
            | Request::ReadUid { target, .. } => target,
        }
    }

    pub fn index(&self) -> u8 {
        match *self {
            Request::Read { index, .. }
            | Request::Write { index, .. }
            | Request::CheckPresence { index, .. }
            | Request::ReadUid { index, .. } => index,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Request::Write { payload, .. } => payload.as_slice(),
            _ => &[],
        }
    }

    /// Encodes the request as sent by a host:
    /// `START op target index payload.. [crc] END`.
    pub fn encode(&self, with_checksum: bool) -> Result<Vec<u8>, ProtocolError> {
        let mut body = vec![self.target(), self.index()];
        body.extend_from_slice(self.payload());
        encode_frame(self.opcode() as u8, &body, with_checksum)
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}:{} {:02X?}",
            self.opcode(),
            self.target(),
            self.index(),
            self.payload()
        )
    }
}

/// Wraps `lead` and `body` in sentinels, optionally appending the checksum of
/// `body`. There is no escaping, so a sentinel value anywhere inside the frame
/// is refused.
pub(crate) fn encode_frame(
    lead: u8,
    body: &[u8],
    with_checksum: bool,
) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.push(START);
    frame.push(lead);
    frame.extend_from_slice(body);
    if with_checksum {
        frame.push(checksum(body));
    }

    if let Some(&byte) = frame[1..].iter().find(|&&b| is_sentinel(b)) {
        return Err(ProtocolError::SentinelCollision(byte));
    }

    frame.push(END);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_read() {
        let req = Request::Read {
            target: 0,
            index: 3,
        };
        assert_eq!(req.encode(false).unwrap(), vec![0x5E, 0x01, 0x00, 0x03, 0x24]);
        assert_eq!(
            req.encode(true).unwrap(),
            vec![0x5E, 0x01, 0x00, 0x03, 0xE2, 0x24]
        );
    }

    #[test]
    fn encode_write() {
        let req = Request::Write {
            target: 1,
            index: 2,
            payload: Payload::from_slice(&[0xAA, 0xBB]).unwrap(),
        };
        assert_eq!(
            req.encode(false).unwrap(),
            vec![0x5E, 0x02, 0x01, 0x02, 0xAA, 0xBB, 0x24]
        );
        assert_eq!(req.to_string(), "Write 1:2 [AA, BB]");
    }

    #[test]
    fn encode_refuses_sentinels() {
        let req = Request::Read {
            target: END,
            index: 0,
        };
        assert_eq!(
            req.encode(false),
            Err(ProtocolError::SentinelCollision(END))
        );

        // crc of [0x00, 0x01] is 0x5E
        let req = Request::Read {
            target: 0x00,
            index: 0x01,
        };
        assert!(req.encode(false).is_ok());
        assert_eq!(
            req.encode(true),
            Err(ProtocolError::SentinelCollision(START))
        );
    }

    #[test]
    fn handler_error_codes() {
        for err in [
            HandlerError::NotPresent,
            HandlerError::InvalidAddress,
            HandlerError::BadPayload,
            HandlerError::DeviceFault,
            HandlerError::Unencodable,
            HandlerError::Other(0x40),
        ] {
            assert_eq!(HandlerError::from_code(err.code()), err);
        }
    }
}
