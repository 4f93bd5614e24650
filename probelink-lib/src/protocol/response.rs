use log::debug;
use num_traits::FromPrimitive;

use super::{encode_frame, HandlerError, Opcode, ProtocolError, END, START};
use crate::crc::checksum;

/// Longest response body accepted by [`ResponseDecoder`].
const MAX_RESPONSE_LEN: usize = 64;

const STATUS_OK: u8 = 0x00;

const PRESENT: u8 = b'Y';
const ABSENT: u8 = b'N';

/// Outcome of one handler call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Value([u8; 4]),
    Ack,
    Presence(bool),
    Uid(Vec<u8>),
    Failure(HandlerError),
}

impl Response {
    fn status(&self) -> u8 {
        match self {
            Response::Failure(e) => e.code(),
            _ => STATUS_OK,
        }
    }

    fn data(&self) -> Vec<u8> {
        match self {
            Response::Value(value) => value.to_vec(),
            Response::Ack | Response::Failure(_) => Vec::new(),
            Response::Presence(present) => vec![if *present { PRESENT } else { ABSENT }],
            Response::Uid(uid) => uid.clone(),
        }
    }
}

/// A response together with the operation it answers. On the wire:
/// `START op status data.. [crc] END`, the checksum covering status and data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    pub opcode: Opcode,
    pub response: Response,
}

impl ResponseFrame {
    pub fn new(opcode: Opcode, response: Response) -> Self {
        Self { opcode, response }
    }

    pub fn encode(&self, with_checksum: bool) -> Result<Vec<u8>, ProtocolError> {
        let mut body = vec![self.response.status()];
        body.extend(self.response.data());
        encode_frame(self.opcode as u8, &body, with_checksum)
    }

    /// Parses the bytes found between the sentinels.
    pub fn decode(inner: &[u8], with_checksum: bool) -> Result<Self, ProtocolError> {
        let inner = if with_checksum {
            let (&received, rest) = inner.split_last().ok_or(ProtocolError::BadPacket)?;
            if rest.is_empty() || checksum(&rest[1..]) != received {
                return Err(ProtocolError::ChecksumMismatch);
            }
            rest
        } else {
            inner
        };

        if inner.len() < 2 {
            return Err(ProtocolError::BadPacket);
        }

        let opcode = match Opcode::from_u8(inner[0]) {
            Some(Opcode::None) | None => return Err(ProtocolError::UnknownOpcode(inner[0])),
            Some(op) => op,
        };
        let status = inner[1];
        let data = &inner[2..];

        if status != STATUS_OK {
            return Ok(Self::new(
                opcode,
                Response::Failure(HandlerError::from_code(status)),
            ));
        }

        let response = match (opcode, data.len()) {
            (Opcode::Read, 4) => Response::Value([data[0], data[1], data[2], data[3]]),
            (Opcode::Write, 0) => Response::Ack,
            (Opcode::CheckPresence, 1) if data[0] == PRESENT => Response::Presence(true),
            (Opcode::CheckPresence, 1) if data[0] == ABSENT => Response::Presence(false),
            (Opcode::ReadUid, _) => Response::Uid(data.to_vec()),
            _ => return Err(ProtocolError::BadPacket),
        };

        Ok(Self::new(opcode, response))
    }
}

/// Reassembles response frames from a byte stream, host side.
pub struct ResponseDecoder {
    buf: Vec<u8>,
    open: bool,
    with_checksum: bool,
}

impl ResponseDecoder {
    pub fn new(with_checksum: bool) -> Self {
        Self {
            buf: Vec::with_capacity(MAX_RESPONSE_LEN),
            open: false,
            with_checksum,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Result<ResponseFrame, ProtocolError>> {
        match byte {
            START => {
                if self.open && !self.buf.is_empty() {
                    debug!("response restarted, dropping {:02X?}", self.buf);
                }
                self.buf.clear();
                self.open = true;
                None
            }
            END if self.open => {
                self.open = false;
                let frame = ResponseFrame::decode(&self.buf, self.with_checksum);
                self.buf.clear();
                Some(frame)
            }
            _ if self.open => {
                if self.buf.len() == MAX_RESPONSE_LEN {
                    self.open = false;
                    self.buf.clear();
                    return Some(Err(ProtocolError::BadPacket));
                }
                self.buf.push(byte);
                None
            }
            _ => None,
        }
    }
}
