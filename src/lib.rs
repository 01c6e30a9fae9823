//! A library for polling the RS485 7-in-1 soil probe (moisture, temperature,
//! pH, nitrogen, phosphorus, potassium).
//!
//! The probe answers a single "read holding registers" request with a
//! checksummed frame of seven registers. This crate provides:
//!
//! 1.  **The wire protocol**: the CRC-16/MODBUS engine in [`crc`], request
//!     and response frames in [`frame`] and the typed reading in
//!     [`protocol`].
//!
//! 2.  **Clients**: stateless functions running one exchange over any
//!     [`transport::Transport`] ([`sync_client`], [`async_client`]) and
//!     stateful, thread-safe clients that serialize access to the bus
//!     ([`sync_safe_client::SafeClient`], [`async_safe_client::SafeClient`]).
//!
//! 3.  **The polling cycle**: [`poller::Poller`] and [`poller::AsyncPoller`]
//!     poll on a fixed period and keep the last known good reading in a
//!     [`poller::ReadingCache`] that consumers read or subscribe to.
//!
//! ## Features
//!
//! - `serial-sync`: blocking serial transport.
//! - `serial-async`: `tokio` serial transport.
//! - `async`: `async` clients and poller.
//! - `serde`: `Serialize`/`Deserialize` for the protocol types.
//!
//! ## Quick Start
//!
//! ```no_run
//! use soilprobe_lib::{
//!     poller::{Acquisition, Poller},
//!     protocol::{Address, BaudRate},
//!     sync_safe_client::SafeClient,
//!     transport::SerialTransport,
//! };
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = SerialTransport::open("/dev/ttyUSB0", &BaudRate::B9600)?;
//!     let client = SafeClient::new(port, Address::default());
//!
//!     // One exchange
//!     println!("Soil: {}", client.read_all()?);
//!
//!     // Periodic polling
//!     let poller = Poller::start(client, Duration::from_secs(5))?;
//!     std::thread::sleep(Duration::from_secs(12));
//!     match poller.current() {
//!         Acquisition::Available(reading) => println!("Latest: {}", reading),
//!         Acquisition::NotYetAcquired => println!("No reading yet"),
//!     }
//!     println!("{:?}", poller.status());
//!     poller.stop();
//!
//!     Ok(())
//! }
//! ```

pub mod crc;
pub mod error;
pub mod frame;
pub mod poller;
pub mod protocol;
pub mod sync_client;
pub mod sync_safe_client;
pub mod transport;

pub use error::SensorError;

#[cfg(any(feature = "serial-sync", feature = "serial-async"))]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
#[cfg(feature = "async")]
pub mod async_client;

#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
#[cfg(feature = "async")]
pub mod async_safe_client;
