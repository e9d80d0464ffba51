//! CRC16-CCITT used to protect every wireless frame.
//!
//! Initial value 0xFFFF, polynomial 0x1021, MSB first, no final xor
//! (the `CRC_16_IBM_3740` catalogue entry). An empty range yields 0 rather
//! than the catalogue's 0xFFFF; deployed nodes rely on that.
//!
//! The checksum travels after the covered bytes, low byte first.

use crc::{Crc, CRC_16_IBM_3740};

use super::wire_format::FOOTER_SIZE;

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC16 of `data`.
///
/// # Example
///
/// ```
/// use lorahome_dongle::protocol::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x29B1);
/// assert_eq!(crc16(b""), 0);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    if data.is_empty() {
        return 0;
    }
    CCITT.checksum(data)
}

/// Check the trailing CRC of a received frame.
///
/// The last two bytes hold the transmitted CRC (low, then high); the CRC is
/// recomputed over everything before them. Callers bound the frame length
/// before calling; anything shorter than the footer is invalid.
pub fn validate(frame: &[u8]) -> bool {
    if frame.len() < FOOTER_SIZE {
        return false;
    }
    let (body, footer) = frame.split_at(frame.len() - FOOTER_SIZE);
    let received = u16::from_le_bytes([footer[0], footer[1]]);
    received == crc16(body)
}

/// Append the CRC of `buf` to it.
pub(crate) fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc16(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}
