//! Blocking exchange with the soil probe.
//!
//! [`SoilProbe`] offers stateless functions that run one request/response
//! exchange over any [`Transport`]. For a stateful, shareable client see
//! [`crate::sync_safe_client::SafeClient`].
//!
//! # Example
//!
//! ```no_run
//! use soilprobe_lib::{
//!     protocol::{Address, BaudRate},
//!     sync_client::{SoilProbe, DEFAULT_SETTLE},
//!     transport::SerialTransport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut port = SerialTransport::open("/dev/ttyUSB0", &BaudRate::B9600)?;
//!     let reading = SoilProbe::read_all(&mut port, Address::default(), DEFAULT_SETTLE)?;
//!     println!("Soil: {}", reading);
//!     Ok(())
//! }
//! ```
use crate::{
    error::{Result, SensorError},
    frame::{self, Registers},
    protocol as proto,
    transport::Transport,
};
use log::*;
use std::{fmt, time::Duration};

/// Time the probe gets to answer a request.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Stateless blocking operations of the soil probe.
#[derive(Debug)]
pub struct SoilProbe;

impl SoilProbe {
    /// Runs one exchange and returns the verified register block.
    ///
    /// Stale input is flushed first, then the request is written and the
    /// response collected for up to `settle`.
    ///
    /// # Errors
    ///
    /// * [`SensorError::NoResponse`] if nothing arrived within `settle` or
    ///   the port failed; the port error is kept as the source.
    /// * [`SensorError::ProtocolFault`] if the response was rejected.
    pub fn read_registers<T: Transport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
    ) -> Result<Registers> {
        transport.flush_input()?;
        let request = frame::encode_request(
            *address,
            proto::SensorReading::ADDRESS,
            proto::SensorReading::QUANTITY,
        );
        trace!("-> {}", Hex(&request));
        transport.write(&request)?;

        let response = transport.read(settle)?;
        if response.is_empty() {
            return Err(SensorError::silence());
        }
        trace!("<- {}", Hex(&response));
        Ok(frame::decode_response(
            &response,
            *address,
            proto::READ_HOLDING_REGISTERS,
        )?)
    }

    /// Runs one exchange and maps the registers to a [`proto::SensorReading`].
    pub fn read_all<T: Transport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
    ) -> Result<proto::SensorReading> {
        let registers = Self::read_registers(transport, address, settle)?;
        let reading = proto::SensorReading::from_registers(&registers);
        debug!("Probe {address}: {reading}");
        Ok(reading)
    }

    /// Runs a full exchange and returns a single field, `None` on any failure.
    pub fn read_field<T: Transport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
        field: proto::Field,
    ) -> Option<proto::FieldValue> {
        match Self::read_all(transport, address, settle) {
            Ok(reading) => Some(reading.get(field)),
            Err(err) => {
                debug!("Cannot read {field} from probe {address}: {err}");
                None
            }
        }
    }
}

/// Formats bytes as space separated hex for frame traces.
pub(crate) struct Hex<'a>(pub(crate) &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_response;
    use crate::transport::mock::{Reply, ScriptedTransport};
    use assert_matches::assert_matches;

    const REGISTERS: Registers = [123, 456, 0, 65, 10, 20, 30];

    fn address() -> proto::Address {
        proto::Address::default()
    }

    #[test]
    fn read_all_decodes_reading() {
        let mut transport =
            ScriptedTransport::new([Reply::Frame(encode_response(1, &REGISTERS).to_vec())]);
        let reading = SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE).unwrap();
        assert_eq!(reading.moisture, 12.3);
        assert_eq!(reading.temperature, 45.6);
        assert_eq!(reading.ph, 6.5);
        assert_eq!(reading.nitrogen, 10);
        assert_eq!(reading.phosphorus, 20);
        assert_eq!(reading.potassium, 30);

        assert_eq!(
            transport.written,
            vec![vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x07, 0x04, 0x08]]
        );
        assert_eq!(transport.flushes, 1);
        assert_eq!(transport.waits, vec![DEFAULT_SETTLE]);
    }

    #[test]
    fn request_uses_client_address() {
        let address = proto::Address::try_from(0x22).unwrap();
        let mut transport =
            ScriptedTransport::new([Reply::Frame(encode_response(0x22, &REGISTERS).to_vec())]);
        SoilProbe::read_all(&mut transport, address, DEFAULT_SETTLE).unwrap();
        assert_eq!(
            transport.written[0],
            frame::encode_request(0x22, 0, 7).to_vec()
        );
    }

    #[test]
    fn silence_is_no_response() {
        let mut transport = ScriptedTransport::new([Reply::Silence]);
        assert_matches!(
            SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE),
            Err(SensorError::NoResponse { source: None })
        );
    }

    #[test]
    fn truncated_response_is_protocol_fault() {
        let frame = encode_response(1, &REGISTERS);
        let mut transport = ScriptedTransport::new([Reply::Frame(frame[..17].to_vec())]);
        assert_matches!(
            SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE),
            Err(SensorError::ProtocolFault(frame::DecodeError::TooShort {
                actual: 17
            }))
        );
    }

    #[test]
    fn corrupted_response_is_protocol_fault() {
        let mut frame = encode_response(1, &REGISTERS);
        frame[5] ^= 0x10;
        let mut transport = ScriptedTransport::new([Reply::Frame(frame.to_vec())]);
        assert_matches!(
            SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE),
            Err(SensorError::ProtocolFault(
                frame::DecodeError::ChecksumMismatch { .. }
            ))
        );
    }

    #[test]
    fn foreign_slave_is_protocol_fault() {
        let mut transport =
            ScriptedTransport::new([Reply::Frame(encode_response(9, &REGISTERS).to_vec())]);
        assert_matches!(
            SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE),
            Err(SensorError::ProtocolFault(
                frame::DecodeError::UnexpectedHeader { slave: 9, .. }
            ))
        );
    }

    #[test]
    fn write_failure_is_no_response() {
        let mut transport = ScriptedTransport::new([Reply::Fail(std::io::ErrorKind::BrokenPipe)]);
        let err = SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE).unwrap_err();
        assert_matches!(
            &err,
            SensorError::NoResponse { source: Some(io) } if io.kind() == std::io::ErrorKind::BrokenPipe
        );
        assert!(err.is_transport_fault());
    }

    #[test]
    fn stale_input_is_flushed_before_request() {
        let mut transport = ScriptedTransport::new([
            Reply::Late(encode_response(1, &[1, 1, 1, 1, 1, 1, 1]).to_vec()),
            Reply::Frame(encode_response(1, &REGISTERS).to_vec()),
        ]);
        assert_matches!(
            SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE),
            Err(SensorError::NoResponse { source: None })
        );
        // The late answer of the first request must not be taken as the
        // answer of the second one.
        let reading = SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE).unwrap();
        assert_eq!(reading.nitrogen, 10);
        assert_eq!(transport.flushed_bytes, frame::RESPONSE_LEN);
    }

    #[test]
    fn unsolicited_noise_is_discarded() {
        let mut transport =
            ScriptedTransport::new([Reply::Frame(encode_response(1, &REGISTERS).to_vec())]);
        transport.inject_noise(&[0xFF, 0x00, 0x13]);
        assert!(SoilProbe::read_all(&mut transport, address(), DEFAULT_SETTLE).is_ok());
        assert_eq!(transport.flushed_bytes, 3);
    }

    #[test]
    fn read_field_performs_full_exchange() {
        let frame = encode_response(1, &REGISTERS).to_vec();
        let mut transport =
            ScriptedTransport::new([Reply::Frame(frame.clone()), Reply::Frame(frame), Reply::Silence]);
        assert_eq!(
            SoilProbe::read_field(&mut transport, address(), DEFAULT_SETTLE, proto::Field::Ph),
            Some(proto::FieldValue::Scaled(6.5))
        );
        assert_eq!(
            SoilProbe::read_field(
                &mut transport,
                address(),
                DEFAULT_SETTLE,
                proto::Field::Potassium
            ),
            Some(proto::FieldValue::Count(30))
        );
        assert_eq!(
            SoilProbe::read_field(&mut transport, address(), DEFAULT_SETTLE, proto::Field::Ph),
            None
        );
        assert_eq!(transport.written.len(), 3);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(Hex(&[0x01, 0x03, 0xAB]).to_string(), "01 03 AB");
        assert_eq!(Hex(&[]).to_string(), "");
    }
}
