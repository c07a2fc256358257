//! Word CRC compatible with the STM32 hardware CRC unit
//!
//! The CRC peripheral in its reset configuration computes CRC-32/MPEG-2
//! (polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection, no final XOR)
//! and consumes each 32-bit word most-significant byte first. Persisted
//! records are little-endian in memory, so each word is decoded LE and
//! then fed big-endian.

use crc::{Crc, CRC_32_MPEG_2};

/// CRC-32/MPEG-2 algorithm
const CRC32_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Calculate the CRC of a little-endian word image
///
/// `bytes.len()` must be a multiple of four; a trailing partial word is
/// ignored.
pub fn crc32_words(bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() % 4 == 0);

    let mut digest = CRC32_MPEG2.digest();
    for chunk in bytes.chunks_exact(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        digest.update(&word.to_be_bytes());
    }
    digest.finalize()
}
