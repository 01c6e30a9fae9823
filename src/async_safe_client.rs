//! Asynchronous, thread-safe client for the soil probe.
//!
//! The `async` twin of [`crate::sync_safe_client`]. The transport lives
//! behind a `tokio::sync::Mutex` that is held across the whole exchange.
//!
//! ## Example
//!
//! ```no_run
//! use soilprobe_lib::{async_safe_client::SafeClient, protocol::Field, transport::AsyncTransport};
//!
//! async fn show<T: AsyncTransport>(client: &SafeClient<T>) {
//!     match client.read_all().await {
//!         Ok(reading) => println!("Soil: {}", reading),
//!         Err(err) => eprintln!("Probe {}: {}", client.address(), err),
//!     }
//!     println!("pH only: {:?}", client.read_field(Field::Ph).await);
//! }
//! ```
use crate::{async_client::SoilProbe, error::Result, protocol as proto, transport::AsyncTransport};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Stateful `async` client of one probe.
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

impl<T: AsyncTransport> SafeClient<T> {
    /// Creates a new `SafeClient` talking to the probe at `address`.
    pub fn new(transport: T, address: proto::Address) -> Self {
        Self::from_shared(Arc::new(Mutex::new(transport)), address)
    }

    /// Creates a new `SafeClient` from a shared transport.
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

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Runs one exchange and returns the decoded reading.
    pub async fn read_all(&self) -> Result<proto::SensorReading> {
        let mut transport = self.transport.lock().await;
        SoilProbe::read_all(&mut *transport, self.address, self.settle).await
    }

    /// Runs one exchange and returns a single field, `None` on failure.
    pub async fn read_field(&self, field: proto::Field) -> Option<proto::FieldValue> {
        let mut transport = self.transport.lock().await;
        SoilProbe::read_field(&mut *transport, self.address, self.settle, field).await
    }
}
