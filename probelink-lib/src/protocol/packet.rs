use num_traits::FromPrimitive;

use super::{FrameError, Opcode, ProtocolError, Request};
use crate::crc::checksum;

pub const PAYLOAD_CAPACITY: usize = 4;

/// Operation, target and index precede the payload.
pub(crate) const HEADER_LEN: usize = 3;

/// Fixed-capacity operation data carried by a frame.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Payload {
    buf: [u8; PAYLOAD_CAPACITY],
    len: usize,
}

impl Payload {
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > PAYLOAD_CAPACITY {
            return Err(ProtocolError::PayloadTooLong(data.len()));
        }
        let mut payload = Payload::default();
        payload.buf[..data.len()].copy_from_slice(data);
        payload.len = data.len();
        Ok(payload)
    }

    /// Appends `byte`, returns `false` if the buffer is already full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len == PAYLOAD_CAPACITY {
            return false;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Little-endian value of the payload, zero-extended to 32 bits.
    pub fn to_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes[..self.len].copy_from_slice(self.as_slice());
        u32::from_le_bytes(bytes)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X?}", self.as_slice())
    }
}

/// The frame currently being assembled by a [`super::Framer`].
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub operation: Opcode,
    pub target: u8,
    pub index: u8,
    pub payload: Payload,
    pub completed: bool,
    position: usize,
    raw_operation: u8,
    dropped: usize,
}

impl Packet {
    pub fn reset(&mut self) {
        *self = Packet::default();
    }

    /// Number of data bytes seen since the start sentinel, dropped ones
    /// included.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Payload bytes that did not fit into the buffer.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Stores `byte` in the field its position selects. Returns `false` when
    /// the byte was past payload capacity and got dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        let pos = self.position;
        self.position += 1;

        match pos {
            0 => {
                self.raw_operation = byte;
                self.operation = Opcode::from_u8(byte).unwrap_or_default();
                true
            }
            1 => {
                self.target = byte;
                true
            }
            2 => {
                self.index = byte;
                true
            }
            _ => {
                let stored = self.payload.push(byte);
                if !stored {
                    self.dropped += 1;
                }
                stored
            }
        }
    }

    /// Checksum over the addressing and stored payload bytes.
    pub fn checksum(&self) -> u8 {
        let mut body = [0u8; 2 + PAYLOAD_CAPACITY];
        body[0] = self.target;
        body[1] = self.index;
        body[2..2 + self.payload.len()].copy_from_slice(self.payload.as_slice());
        checksum(&body[..2 + self.payload.len()])
    }
}

impl TryFrom<&Packet> for Request {
    type Error = FrameError;

    fn try_from(packet: &Packet) -> Result<Self, Self::Error> {
        if packet.position < HEADER_LEN {
            return Err(FrameError::ShortFrame(packet.position));
        }

        let (target, index) = (packet.target, packet.index);
        match packet.operation {
            Opcode::Read => Ok(Request::Read { target, index }),
            Opcode::Write => Ok(Request::Write {
                target,
                index,
                payload: packet.payload,
            }),
            Opcode::CheckPresence => Ok(Request::CheckPresence { target, index }),
            Opcode::ReadUid => Ok(Request::ReadUid { target, index }),
            Opcode::None if packet.raw_operation != 0 => {
                Err(FrameError::BadOpcode(packet.raw_operation))
            }
            Opcode::None => Err(FrameError::NoOperation),
        }
    }
}
