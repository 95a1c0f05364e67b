//! STM8 bootloader wire framing.
//!
//! Every exchange with the ROM bootloader uses one of three frame shapes,
//! each terminated by an XOR checksum:
//!
//! ```text
//! command:  +------+-------+          checksum of a single opcode is its
//!           | CMD  | ~CMD  |          bitwise complement (CMD ^ 0xFF)
//!           +------+-------+
//!
//! address:  +------+------+------+------+-------+
//!           | a31  | a23  | a15  | a7   |  XOR  |   big-endian, MSB first
//!           +------+------+------+------+-------+
//!
//! payload:  +------+------+-----+--------+-------+
//!           | N-1  | d0   | ... | d(N-1) |  XOR  |   checksum covers the
//!           +------+------+-----+--------+-------+   length byte and data
//! ```
//!
//! Lengths on the wire follow the bootloader's N-1 convention: to transfer
//! N bytes (1..=256) the length byte is `N - 1`.

use byteorder::{BigEndian, WriteBytesExt};

/// Synchronization byte; must be the very first byte on the wire so the
/// target's autobaud detection can lock onto the host rate.
pub const SYNCH: u8 = 0x7F;

/// Positive acknowledge.
pub const ACK: u8 = 0x79;

/// Negative acknowledge. During synchronization it means "already
/// synchronized" and counts as success.
pub const NACK: u8 = 0x1F;

/// Busy flag status. Defined by the bootloader but never expected in an
/// acknowledge slot; it is treated like any other unexpected byte.
pub const BUSY: u8 = 0xAA;

/// Total length of a GET response: ACK, byte count, version, five command
/// codes, ACK.
pub const GET_RESPONSE_LEN: usize = 9;

/// Largest number of bytes one READ transaction can transfer.
pub const MAX_READ_CHUNK: usize = 256;

/// Largest number of bytes one WRITE transaction can transfer.
pub const MAX_WRITE_CHUNK: usize = 128;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Get the bootloader version and the supported command codes.
    Get = 0x00,
    /// Read up to 256 bytes of memory.
    Read = 0x11,
    /// Jump to an address and hand over execution.
    Go = 0x21,
    /// Write up to 128 bytes to RAM or flash.
    Write = 0x31,
    /// Erase flash program memory / data EEPROM sectors.
    Erase = 0x43,
}

impl Command {
    /// The complement byte transmitted right after the opcode.
    #[must_use]
    pub fn complement(self) -> u8 {
        (self as u8) ^ 0xFF
    }

    /// The two-byte command frame `[opcode, ~opcode]`.
    #[must_use]
    pub fn frame(self) -> [u8; 2] {
        command_frame(self as u8)
    }
}

/// Build a command frame for a raw opcode byte.
#[must_use]
pub fn command_frame(opcode: u8) -> [u8; 2] {
    [opcode, opcode ^ 0xFF]
}

/// XOR of all bytes; the protocol's only integrity check.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, byte| acc ^ byte)
}

/// On-wire length byte for transferring `n` bytes (1..=256).
#[must_use]
#[allow(clippy::cast_possible_truncation)] // n - 1 fits after the range check
pub fn encode_len(n: usize) -> u8 {
    debug_assert!((1..=256).contains(&n), "transfer length out of range: {n}");
    (n - 1) as u8
}

/// 5-byte address frame: the address in big-endian order followed by the
/// XOR of its four bytes.
#[must_use]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_addr(addr: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5);
    frame.write_u32::<BigEndian>(addr).unwrap();
    frame.push(checksum(&frame));
    frame
}

/// Payload frame for a WRITE transaction: `[N-1, data.., chk]` where the
/// checksum covers the length byte and every data byte.
#[must_use]
pub fn write_frame(data: &[u8]) -> Vec<u8> {
    debug_assert!(
        (1..=MAX_WRITE_CHUNK).contains(&data.len()),
        "write chunk out of range: {}",
        data.len()
    );
    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(encode_len(data.len()));
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));
    frame
}

/// 3-byte erase frame for a single sector: count-1 (zero), the sector code,
/// and their XOR.
#[must_use]
pub fn erase_frame(sector: u8) -> [u8; 3] {
    [0x00, sector, sector]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_complement_exhaustive() {
        for opcode in 0..=u8::MAX {
            let frame = command_frame(opcode);
            assert_eq!(frame[0], opcode);
            assert_eq!(frame[1], opcode ^ 0xFF);
        }
    }

    #[test]
    fn test_command_frames_match_wire_constants() {
        assert_eq!(Command::Get.frame(), [0x00, 0xFF]);
        assert_eq!(Command::Read.frame(), [0x11, 0xEE]);
        assert_eq!(Command::Go.frame(), [0x21, 0xDE]);
        assert_eq!(Command::Write.frame(), [0x31, 0xCE]);
        assert_eq!(Command::Erase.frame(), [0x43, 0xBC]);
    }

    #[test]
    fn test_encode_len_exhaustive() {
        for n in 1..=256 {
            assert_eq!(encode_len(n), (n - 1) as u8);
        }
    }

    #[test]
    fn test_encode_addr_layout() {
        for addr in [
            0x0000_0000,
            0x0000_8000,
            0x0000_8C00,
            0x0004_7FFF,
            0x1234_5678,
            0xFFFF_FFFF,
        ] {
            let frame = encode_addr(addr);
            assert_eq!(frame.len(), 5);
            assert_eq!(&frame[..4], &addr.to_be_bytes());
            assert_eq!(frame[4], frame[0] ^ frame[1] ^ frame[2] ^ frame[3]);
        }
    }

    #[test]
    fn test_encode_addr_flash_base() {
        // The address frame for 0x8000 as seen on the wire.
        assert_eq!(encode_addr(0x8000), vec![0x00, 0x00, 0x80, 0x00, 0x80]);
    }

    #[test]
    fn test_checksum_folds_xor() {
        assert_eq!(checksum(&[]), 0x00);
        assert_eq!(checksum(&[0x5A]), 0x5A);
        assert_eq!(checksum(&[0x01, 0x12, 0x34]), 0x27);
    }

    #[test]
    fn test_write_frame_trace() {
        // Write 2 bytes: length byte 0x01, data, checksum 0x01^0x12^0x34.
        assert_eq!(write_frame(&[0x12, 0x34]), vec![0x01, 0x12, 0x34, 0x27]);
    }

    #[test]
    fn test_write_frame_checksum_property() {
        for len in [1usize, 2, 3, 16, 127, 128] {
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37)).collect();
            let frame = write_frame(&data);
            assert_eq!(frame.len(), len + 2);
            assert_eq!(frame[0], (len - 1) as u8);
            assert_eq!(&frame[1..=len], &data[..]);
            let expected = checksum(&data) ^ (len - 1) as u8;
            assert_eq!(frame[len + 1], expected);
        }
    }

    #[test]
    fn test_erase_frame() {
        assert_eq!(erase_frame(3), [0x00, 0x03, 0x03]);
        assert_eq!(erase_frame(0), [0x00, 0x00, 0x00]);
        assert_eq!(erase_frame(0xFF), [0x00, 0xFF, 0xFF]);
    }
}
