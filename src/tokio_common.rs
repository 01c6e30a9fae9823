//! Serial line settings shared by the blocking and the `tokio` transports.
//!
//! The probe talks 8N1 without flow control. Frames on the bus are delimited
//! by a silence of at least 3.5 character times.
use crate::protocol as proto;
use std::time::Duration;

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Lower bound of the inter-frame silence.
pub const MINIMUM_FRAME_GAP: Duration = Duration::from_micros(1_750);

/// Creates a `tokio_serial::SerialPortBuilder` with the probe's line settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u16::from(baud_rate) as u32)
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// The RTU inter-frame silence (3.5 character times) for a baud rate.
///
/// A character is counted as 11 bits, the common Modbus assumption. The
/// result is never below [`MINIMUM_FRAME_GAP`].
pub fn minimum_frame_gap(baud_rate: &proto::BaudRate) -> Duration {
    let bits_per_char = 11.0;
    let rate = u16::from(baud_rate) as f64;
    let gap_micros = (3.5 * bits_per_char / rate * 1_000_000.0) as u64;
    Duration::from_micros(gap_micros).max(MINIMUM_FRAME_GAP)
}
