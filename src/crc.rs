//! CRC-16/MODBUS (reflected polynomial `0xA001`, initial value `0xFFFF`).
//!
//! The probe appends this checksum to every frame, low byte first.
use ::crc::{Crc, CRC_16_MODBUS};

/// Checksum engine shared by the frame encoder and decoder.
pub const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes the checksum of `data`.
///
/// Returns `0xFFFF` for empty input.
///
/// # Examples
///
/// ```
/// use soilprobe_lib::crc::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x4B37);
/// assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x07]), 0x0804);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}
