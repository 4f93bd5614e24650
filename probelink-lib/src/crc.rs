//! CRC-8 used to protect frame contents.
//!
//! Polynomial 0x8C in reflected form (0x31 normal), seed 0x00, bits are
//! shifted in least-significant first and there is no final xor. This is the
//! 1-Wire CRC, catalogued as CRC-8/MAXIM-DOW.

use crc::{Crc, CRC_8_MAXIM_DOW};

static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Checksum of `bytes`. Empty input yields the seed, `0x00`.
pub fn checksum(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(bytes: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &byte in bytes {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn empty_input_is_seed() {
        assert_eq!(checksum(&[]), 0x00);
    }

    #[test]
    fn catalogue_check_value() {
        assert_eq!(checksum(b"123456789"), 0xA1);
    }

    #[test]
    fn matches_bitwise_reference() {
        for byte in 0..=255u8 {
            assert_eq!(checksum(&[byte]), reference(&[byte]), "byte {byte:#04x}");
        }
        assert_eq!(checksum(&[0x00, 0x03]), 0xE2);
        assert_eq!(checksum(&[0x01, 0x02, 0xAA, 0xBB]), 0xDB);
        assert_eq!(
            checksum(&[0x10, 0x20, 1, 2, 3, 4]),
            reference(&[0x10, 0x20, 1, 2, 3, 4])
        );
    }

    #[test]
    fn deterministic() {
        let data = [0x5E, 0x02, 0x01, 0x02, 0xAA, 0xBB, 0x24];
        assert_eq!(checksum(&data), checksum(&data));
    }

    #[test]
    fn single_bit_flips_detected_on_two_byte_inputs() {
        for word in 0..=u16::MAX {
            let bytes = word.to_le_bytes();
            let crc = checksum(&bytes);
            for bit in 0..16 {
                let flipped = (word ^ (1 << bit)).to_le_bytes();
                assert_ne!(checksum(&flipped), crc, "{bytes:02X?} bit {bit}");
            }
        }
    }
}
