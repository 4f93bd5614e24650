//! In-memory tag used by `probelink-device` and the tests.

use async_trait::async_trait;
use log::debug;

use crate::protocol::slave::Device;
use crate::protocol::{HandlerError, PAYLOAD_CAPACITY};

pub const BLOCK_COUNT: usize = 64;

pub const DEFAULT_UID: [u8; 7] = [0x04, 0xA2, 0x1B, 0x3C, 0x11, 0x80, 0x90];

/// A single tag answering on `target`, with 32-bit blocks addressed by index.
#[derive(Debug, Clone)]
pub struct SimTag {
    target: u8,
    present: bool,
    uid: Vec<u8>,
    blocks: [u32; BLOCK_COUNT],
}

impl SimTag {
    pub fn new(target: u8, uid: Vec<u8>) -> Self {
        Self {
            target,
            present: true,
            uid,
            blocks: [0; BLOCK_COUNT],
        }
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn block(&self, index: u8) -> Option<u32> {
        self.blocks.get(index as usize).copied()
    }

    fn slot(&self, target: u8, index: u8) -> Result<usize, HandlerError> {
        if target != self.target || index as usize >= BLOCK_COUNT {
            return Err(HandlerError::InvalidAddress);
        }
        if !self.present {
            return Err(HandlerError::NotPresent);
        }
        Ok(index as usize)
    }
}

impl Default for SimTag {
    fn default() -> Self {
        SimTag::new(0, DEFAULT_UID.to_vec())
    }
}

#[async_trait]
impl Device for SimTag {
    async fn read(&mut self, target: u8, index: u8) -> Result<u32, HandlerError> {
        let slot = self.slot(target, index)?;
        debug!("tag read block {} = {:#010x}", slot, self.blocks[slot]);
        Ok(self.blocks[slot])
    }

    async fn write(&mut self, target: u8, index: u8, payload: &[u8]) -> Result<(), HandlerError> {
        let slot = self.slot(target, index)?;
        if payload.is_empty() || payload.len() > PAYLOAD_CAPACITY {
            return Err(HandlerError::BadPayload);
        }
        let mut bytes = [0u8; 4];
        bytes[..payload.len()].copy_from_slice(payload);
        self.blocks[slot] = u32::from_le_bytes(bytes);
        debug!("tag write block {} = {:#010x}", slot, self.blocks[slot]);
        Ok(())
    }

    async fn check_presence(&mut self, target: u8, _index: u8) -> Result<bool, HandlerError> {
        Ok(self.present && target == self.target)
    }

    async fn read_uid(&mut self, target: u8, _index: u8) -> Result<Vec<u8>, HandlerError> {
        self.slot(target, 0)?;
        Ok(self.uid.clone())
    }
}
