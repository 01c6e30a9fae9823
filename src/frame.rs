//! Request and response frames of the probe's "read holding registers" exchange.
//!
//! A request is always 8 bytes:
//!
//! ```text
//! +-------+------+---------------+---------------+---------+
//! | slave | 0x03 | start (BE u16)| count (BE u16)| CRC (LE)|
//! +-------+------+---------------+---------------+---------+
//! ```
//!
//! The matching response for seven registers is 19 bytes:
//!
//! ```text
//! +-------+------+------+--------------------------+---------+
//! | slave | 0x03 | 0x0E | 7 x register (BE u16)    | CRC (LE)|
//! +-------+------+------+--------------------------+---------+
//! ```
//!
//! Note the endianness asymmetry: every multi-byte field is big-endian except
//! the trailing CRC.
use crate::{crc::crc16, protocol as proto};

/// Length of an encoded request.
pub const REQUEST_LEN: usize = 8;
/// Slave id, function code and byte count.
pub const RESPONSE_HEADER_LEN: usize = 3;
pub const CRC_LEN: usize = 2;
/// Number of registers of a measurement.
pub const REGISTER_COUNT: usize = proto::SensorReading::QUANTITY as usize;
/// Length of a complete measurement response.
pub const RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + 2 * REGISTER_COUNT + CRC_LEN;
/// Length of a Modbus exception response.
pub const EXCEPTION_LEN: usize = 5;

const EXCEPTION_FLAG: u8 = 0x80;

/// The raw, checksum-verified register block of a response.
pub type Registers = [u16; REGISTER_COUNT];

/// Reasons a response frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Response too short: {actual} bytes, expected {expected}", expected = RESPONSE_LEN)]
    TooShort { actual: usize },

    #[error("Response too long: {actual} bytes, expected {expected}", expected = RESPONSE_LEN)]
    TooLong { actual: usize },

    #[error("Checksum mismatch: received {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },

    #[error(
        "Unexpected header: slave {slave:#04x}, function {function:#04x}, byte count {byte_count}"
    )]
    UnexpectedHeader {
        slave: u8,
        function: u8,
        byte_count: u8,
    },

    #[error("Device replied with exception code {code:#04x}")]
    Exception { code: u8 },
}

/// Builds a "read holding registers" request.
///
/// # Examples
///
/// ```
/// use soilprobe_lib::frame::encode_request;
///
/// assert_eq!(
///     encode_request(0x01, 0x0000, 7),
///     [0x01, 0x03, 0x00, 0x00, 0x00, 0x07, 0x04, 0x08]
/// );
/// ```
pub fn encode_request(slave: u8, start_address: u16, quantity: u16) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = slave;
    frame[1] = proto::READ_HOLDING_REGISTERS;
    frame[2..4].copy_from_slice(&start_address.to_be_bytes());
    frame[4..6].copy_from_slice(&quantity.to_be_bytes());
    let crc = crc16(&frame[..REQUEST_LEN - CRC_LEN]);
    frame[REQUEST_LEN - CRC_LEN..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Validates the trailing little-endian CRC of a frame.
///
/// A frame shorter than [`CRC_LEN`] is [`DecodeError::TooShort`].
pub fn verify_checksum(frame: &[u8]) -> Result<(), DecodeError> {
    if frame.len() < CRC_LEN {
        return Err(DecodeError::TooShort {
            actual: frame.len(),
        });
    }
    let (body, tail) = frame.split_at(frame.len() - CRC_LEN);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received == computed {
        Ok(())
    } else {
        Err(DecodeError::ChecksumMismatch { received, computed })
    }
}

/// Validates a response and extracts its seven registers.
///
/// Checks are applied in order: length, checksum, header. Any failure yields
/// no registers at all.
pub fn decode_response(
    frame: &[u8],
    expected_slave: u8,
    expected_function: u8,
) -> Result<Registers, DecodeError> {
    if frame.len() == EXCEPTION_LEN
        && frame[0] == expected_slave
        && frame[1] == expected_function | EXCEPTION_FLAG
        && verify_checksum(frame).is_ok()
    {
        return Err(DecodeError::Exception { code: frame[2] });
    }
    if frame.len() < RESPONSE_LEN {
        return Err(DecodeError::TooShort {
            actual: frame.len(),
        });
    }
    if frame.len() > RESPONSE_LEN {
        return Err(DecodeError::TooLong {
            actual: frame.len(),
        });
    }
    verify_checksum(frame)?;

    let (slave, function, byte_count) = (frame[0], frame[1], frame[2]);
    if slave != expected_slave
        || function != expected_function
        || byte_count as usize != 2 * REGISTER_COUNT
    {
        return Err(DecodeError::UnexpectedHeader {
            slave,
            function,
            byte_count,
        });
    }

    let mut registers = [0u16; REGISTER_COUNT];
    for (register, bytes) in registers
        .iter_mut()
        .zip(frame[RESPONSE_HEADER_LEN..RESPONSE_LEN - CRC_LEN].chunks_exact(2))
    {
        *register = u16::from_be_bytes([bytes[0], bytes[1]]);
    }
    Ok(registers)
}

/// Builds a valid response frame, the inverse of [`decode_response`].
///
/// Used by the simulated transport in tests.
pub fn encode_response(slave: u8, registers: &Registers) -> [u8; RESPONSE_LEN] {
    let mut frame = [0u8; RESPONSE_LEN];
    frame[0] = slave;
    frame[1] = proto::READ_HOLDING_REGISTERS;
    frame[2] = (2 * REGISTER_COUNT) as u8;
    for (bytes, register) in frame[RESPONSE_HEADER_LEN..RESPONSE_LEN - CRC_LEN]
        .chunks_exact_mut(2)
        .zip(registers)
    {
        bytes.copy_from_slice(&register.to_be_bytes());
    }
    let crc = crc16(&frame[..RESPONSE_LEN - CRC_LEN]);
    frame[RESPONSE_LEN - CRC_LEN..].copy_from_slice(&crc.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GOLDEN_RESPONSE: [u8; RESPONSE_LEN] = [
        0x01, 0x03, 0x0E, 0x00, 0x7B, 0x01, 0xC8, 0x00, 0x00, 0x00, 0x41, 0x00, 0x0A, 0x00, 0x14,
        0x00, 0x1E, 0x68, 0x07,
    ];
    const FC: u8 = proto::READ_HOLDING_REGISTERS;

    #[test]
    fn encode_read_request() {
        assert_eq!(
            encode_request(1, 0, 7),
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x07, 0x04, 0x08]
        );
        let frame = encode_request(0x02, 0x0102, 0x0304);
        assert_eq!(&frame[..6], &[0x02, 0x03, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(frame[6..], crc16(&frame[..6]).to_le_bytes());
    }

    #[test]
    fn decode_golden_response() {
        assert_eq!(
            decode_response(&GOLDEN_RESPONSE, 1, FC),
            Ok([123, 456, 0, 65, 10, 20, 30])
        );
        assert_eq!(encode_response(1, &[123, 456, 0, 65, 10, 20, 30]), GOLDEN_RESPONSE);
    }

    #[test]
    fn every_truncation_is_too_short() {
        for len in 0..RESPONSE_LEN {
            assert_eq!(
                decode_response(&GOLDEN_RESPONSE[..len], 1, FC),
                Err(DecodeError::TooShort { actual: len }),
                "len {len}"
            );
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut frame = GOLDEN_RESPONSE.to_vec();
        frame.push(0x00);
        assert_matches!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::TooLong { actual: 20 })
        );
    }

    #[test]
    fn every_single_bit_flip_is_a_checksum_mismatch() {
        for byte in 0..RESPONSE_LEN {
            for bit in 0..8 {
                let mut frame = GOLDEN_RESPONSE;
                frame[byte] ^= 1 << bit;
                assert_matches!(
                    decode_response(&frame, 1, FC),
                    Err(DecodeError::ChecksumMismatch { .. }),
                    "byte {byte} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn checksum_holds_iff_trailer_matches() {
        let bodies: [&[u8]; 4] = [&[], &[0x00], &[0x01, 0x03, 0x00], &GOLDEN_RESPONSE[..17]];
        for body in bodies {
            let crc = crc16(body);
            let mut frame = body.to_vec();
            frame.extend_from_slice(&crc.to_le_bytes());
            assert_eq!(verify_checksum(&frame), Ok(()));

            let mut swapped = body.to_vec();
            swapped.extend_from_slice(&crc.to_be_bytes());
            if crc.swap_bytes() != crc {
                assert_matches!(
                    verify_checksum(&swapped),
                    Err(DecodeError::ChecksumMismatch { .. })
                );
            }
        }
    }

    #[test]
    fn foreign_slave_or_function_is_unexpected_header() {
        let regs = [123, 456, 0, 65, 10, 20, 30];
        let frame = encode_response(2, &regs);
        assert_matches!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::UnexpectedHeader { slave: 2, .. })
        );

        let mut frame = encode_response(1, &regs);
        frame[1] = 0x04;
        let crc = crc16(&frame[..RESPONSE_LEN - CRC_LEN]);
        frame[RESPONSE_LEN - CRC_LEN..].copy_from_slice(&crc.to_le_bytes());
        assert_matches!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::UnexpectedHeader { function: 0x04, .. })
        );

        let mut frame = encode_response(1, &regs);
        frame[2] = 0x0C;
        let crc = crc16(&frame[..RESPONSE_LEN - CRC_LEN]);
        frame[RESPONSE_LEN - CRC_LEN..].copy_from_slice(&crc.to_le_bytes());
        assert_matches!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::UnexpectedHeader {
                byte_count: 0x0C,
                ..
            })
        );
    }

    #[test]
    fn exception_response() {
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::Exception { code: 0x02 })
        );

        // Corrupted exception frames are plain short frames.
        frame[2] ^= 0x01;
        assert_eq!(
            decode_response(&frame, 1, FC),
            Err(DecodeError::TooShort { actual: 5 })
        );
    }
}
