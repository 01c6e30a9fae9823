//! Blocking, thread-safe client for the soil probe.
//!
//! [`SafeClient`] owns the transport behind an `Arc<Mutex<_>>`. The lock is
//! held for the whole flush-write-read window of an exchange, so clones of
//! the client can be used from several threads without interleaving frames
//! on the half-duplex bus.
//!
//! ## Example
//!
//! ```no_run
//! use soilprobe_lib::{
//!     protocol::{Address, BaudRate, Field},
//!     sync_safe_client::SafeClient,
//!     transport::SerialTransport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = SerialTransport::open("/dev/ttyUSB0", &BaudRate::default())?;
//!     let client = SafeClient::new(port, Address::default());
//!
//!     let reading = client.read_all()?;
//!     println!("Soil: {}", reading);
//!     println!("pH only: {:?}", client.read_field(Field::Ph));
//!
//!     Ok(())
//! }
//! ```
use crate::{error::Result, protocol as proto, sync_client::SoilProbe, transport::Transport};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Stateful blocking client of one probe.
#[derive(Debug)]
pub struct SafeClient<T> {
    transport: Arc<Mutex<T>>,
    address: proto::Address,
    settle: Duration,
}

impl<T> Clone for SafeClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            address: self.address,
            settle: self.settle,
        }
    }
}

impl<T: Transport> SafeClient<T> {
    /// Creates a new `SafeClient` talking to the probe at `address`.
    pub fn new(transport: T, address: proto::Address) -> Self {
        Self::from_shared(Arc::new(Mutex::new(transport)), address)
    }

    /// Creates a new `SafeClient` from a shared transport, e.g. to talk to a
    /// second probe on the same bus.
    pub fn from_shared(transport: Arc<Mutex<T>>, address: proto::Address) -> Self {
        Self {
            transport,
            address,
            settle: crate::sync_client::DEFAULT_SETTLE,
        }
    }

    /// Clones the shared transport.
    pub fn clone_shared(&self) -> Arc<Mutex<T>> {
        self.transport.clone()
    }

    pub fn address(&self) -> proto::Address {
        self.address
    }

    /// Time the probe gets to answer a request.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Runs one exchange and returns the decoded reading.
    pub fn read_all(&self) -> Result<proto::SensorReading> {
        let mut transport = self.lock();
        SoilProbe::read_all(&mut *transport, self.address, self.settle)
    }

    /// Runs one exchange and returns a single field, `None` on failure.
    ///
    /// Nothing is cached, every call is a full exchange.
    pub fn read_field(&self, field: proto::Field) -> Option<proto::FieldValue> {
        let mut transport = self.lock();
        SoilProbe::read_field(&mut *transport, self.address, self.settle, field)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
