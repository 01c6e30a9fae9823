//! Asynchronous exchange with the soil probe.
//!
//! The `async` twin of [`crate::sync_client`]. All functions must be
//! `.await`ed; the response window is waited for without blocking the
//! runtime.
//!
//! # Example
//!
//! ```no_run
//! use soilprobe_lib::{
//!     async_client::SoilProbe, protocol::Address, sync_client::DEFAULT_SETTLE,
//!     transport::AsyncTransport, SensorError,
//! };
//!
//! async fn show<T: AsyncTransport>(port: &mut T) -> Result<(), SensorError> {
//!     let reading = SoilProbe::read_all(port, Address::default(), DEFAULT_SETTLE).await?;
//!     println!("Soil: {}", reading);
//!     Ok(())
//! }
//! ```
use crate::{
    error::{Result, SensorError},
    frame::{self, Registers},
    protocol as proto,
    sync_client::Hex,
    transport::AsyncTransport,
};
use log::*;
use std::time::Duration;

/// Stateless `async` operations of the soil probe.
#[derive(Debug)]
pub struct SoilProbe;

impl SoilProbe {
    /// Runs one exchange and returns the verified register block.
    ///
    /// See [`crate::sync_client::SoilProbe::read_registers`] for the error
    /// cases.
    pub async fn read_registers<T: AsyncTransport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
    ) -> Result<Registers> {
        transport.flush_input().await?;
        let request = frame::encode_request(
            *address,
            proto::SensorReading::ADDRESS,
            proto::SensorReading::QUANTITY,
        );
        trace!("-> {}", Hex(&request));
        transport.write(&request).await?;

        let response = transport.read(settle).await?;
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
    pub async fn read_all<T: AsyncTransport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
    ) -> Result<proto::SensorReading> {
        let registers = Self::read_registers(transport, address, settle).await?;
        let reading = proto::SensorReading::from_registers(&registers);
        debug!("Probe {address}: {reading}");
        Ok(reading)
    }

    /// Runs a full exchange and returns a single field, `None` on any failure.
    pub async fn read_field<T: AsyncTransport + ?Sized>(
        transport: &mut T,
        address: proto::Address,
        settle: Duration,
        field: proto::Field,
    ) -> Option<proto::FieldValue> {
        match Self::read_all(transport, address, settle).await {
            Ok(reading) => Some(reading.get(field)),
            Err(err) => {
                debug!("Cannot read {field} from probe {address}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_response;
    use crate::sync_client::DEFAULT_SETTLE;
    use crate::transport::mock::{Reply, ScriptedTransport};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn read_all_decodes_reading() {
        let mut transport = ScriptedTransport::new([Reply::Frame(
            encode_response(1, &[123, 456, 0, 65, 10, 20, 30]).to_vec(),
        )]);
        let reading = SoilProbe::read_all(&mut transport, proto::Address::default(), DEFAULT_SETTLE)
            .await
            .unwrap();
        assert_eq!(reading.moisture, 12.3);
        assert_eq!(reading.potassium, 30);
        assert_eq!(transport.written[0], frame::encode_request(1, 0, 7).to_vec());
        assert_eq!(transport.flushes, 1);
    }

    #[tokio::test]
    async fn faults_are_classified() {
        let mut corrupted = encode_response(1, &[123, 456, 0, 65, 10, 20, 30]);
        corrupted[18] ^= 0xFF;
        let mut transport = ScriptedTransport::new([
            Reply::Silence,
            Reply::Frame(corrupted.to_vec()),
            Reply::Fail(std::io::ErrorKind::NotConnected),
        ]);
        let address = proto::Address::default();
        assert_matches!(
            SoilProbe::read_all(&mut transport, address, DEFAULT_SETTLE).await,
            Err(SensorError::NoResponse { source: None })
        );
        assert_matches!(
            SoilProbe::read_all(&mut transport, address, DEFAULT_SETTLE).await,
            Err(SensorError::ProtocolFault(
                frame::DecodeError::ChecksumMismatch { .. }
            ))
        );
        assert_matches!(
            SoilProbe::read_all(&mut transport, address, DEFAULT_SETTLE).await,
            Err(SensorError::NoResponse { source: Some(..) })
        );
    }

    #[tokio::test]
    async fn read_field_returns_none_on_failure() {
        let mut transport = ScriptedTransport::new([Reply::Silence]);
        assert_eq!(
            SoilProbe::read_field(
                &mut transport,
                proto::Address::default(),
                DEFAULT_SETTLE,
                proto::Field::Moisture
            )
            .await,
            None
        );
    }
}
