//! Byte-oriented, half-duplex channel to the probe.
//!
//! A transport knows nothing about frames. It writes bytes, hands back
//! whatever arrived within a time budget and discards stale input.
//!
//! [`Transport`] is the blocking flavour, [`AsyncTransport`] the `async` one.
//! Serial implementations are [`SerialTransport`] (feature `serial-sync`) and
//! [`AsyncSerialTransport`] (feature `serial-async`).
use std::{io, time::Duration};

#[cfg(feature = "serial-sync")]
use crate::protocol as proto;
#[cfg(feature = "serial-sync")]
use std::{
    fmt,
    io::{Read, Write},
    time::Instant,
};

/// Blocking byte channel.
pub trait Transport {
    /// Writes a complete frame.
    fn write(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Returns the bytes received within `max_wait`.
    ///
    /// The result may be shorter than a frame or empty on timeout.
    fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>>;

    /// Drops any input received so far.
    fn flush_input(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).write(frame)
    }

    fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        (**self).read(max_wait)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        (**self).flush_input()
    }
}

/// `async` byte channel, see [`Transport`] for the contract.
///
/// The returned futures are `Send` so a transport can be driven from a
/// spawned `tokio` task.
#[cfg(feature = "async")]
pub trait AsyncTransport {
    fn write(&mut self, frame: &[u8]) -> impl std::future::Future<Output = io::Result<()>> + Send;

    fn read(
        &mut self,
        max_wait: Duration,
    ) -> impl std::future::Future<Output = io::Result<Vec<u8>>> + Send;

    fn flush_input(&mut self) -> impl std::future::Future<Output = io::Result<()>> + Send;
}

#[cfg(feature = "serial-sync")]
const READ_CHUNK: usize = 64;

/// Blocking serial port transport.
///
/// [`Transport::read`] blocks in the port with its timeout set to the rest of
/// the budget. It returns early once bytes have arrived and the line has been
/// silent for one inter-frame gap, otherwise it waits the full budget.
#[cfg(feature = "serial-sync")]
pub struct SerialTransport {
    port: Box<dyn tokio_serial::SerialPort>,
    frame_gap: Duration,
}

#[cfg(feature = "serial-sync")]
impl SerialTransport {
    /// Opens `device` with the probe's line settings.
    pub fn open(device: &str, baud_rate: &proto::BaudRate) -> io::Result<Self> {
        let port = crate::tokio_common::serial_port_builder(device, baud_rate).open()?;
        Ok(Self::new(
            port,
            crate::tokio_common::minimum_frame_gap(baud_rate),
        ))
    }

    /// Wraps an already opened port.
    pub fn new(port: Box<dyn tokio_serial::SerialPort>, frame_gap: Duration) -> Self {
        Self { port, frame_gap }
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }
}

#[cfg(feature = "serial-sync")]
impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port.name())
            .field("frame_gap", &self.frame_gap)
            .finish()
    }
}

#[cfg(feature = "serial-sync")]
impl Transport for SerialTransport {
    fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + max_wait;
        let mut received = Vec::new();
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // Up to the deadline for the first byte, one quiet gap after.
            let wait = if received.is_empty() {
                deadline - now
            } else {
                self.frame_gap.min(deadline - now)
            };
            self.port.set_timeout(wait)?;
            match self.port.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => received.extend_from_slice(&buffer[..count]),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    if !received.is_empty() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(received)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.port.clear(tokio_serial::ClearBuffer::Input)?;
        Ok(())
    }
}

/// `tokio` serial port transport with the same read semantics as
/// [`SerialTransport`].
#[cfg(feature = "serial-async")]
pub struct AsyncSerialTransport {
    stream: tokio_serial::SerialStream,
    frame_gap: Duration,
}

#[cfg(feature = "serial-async")]
impl AsyncSerialTransport {
    /// Opens `device` with the probe's line settings.
    ///
    /// Must be called from within a `tokio` runtime.
    pub fn open(device: &str, baud_rate: &crate::protocol::BaudRate) -> io::Result<Self> {
        let builder = crate::tokio_common::serial_port_builder(device, baud_rate);
        let stream = tokio_serial::SerialStream::open(&builder)?;
        Ok(Self::new(
            stream,
            crate::tokio_common::minimum_frame_gap(baud_rate),
        ))
    }

    pub fn new(stream: tokio_serial::SerialStream, frame_gap: Duration) -> Self {
        Self { stream, frame_gap }
    }
}

#[cfg(feature = "serial-async")]
impl std::fmt::Debug for AsyncSerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSerialTransport")
            .field("frame_gap", &self.frame_gap)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "serial-async")]
impl AsyncTransport for AsyncSerialTransport {
    async fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        AsyncWriteExt::write_all(&mut self.stream, frame).await?;
        AsyncWriteExt::flush(&mut self.stream).await
    }

    async fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        use tokio::time::{timeout_at, Instant};

        let deadline = Instant::now() + max_wait;
        let mut received = Vec::new();
        let mut buffer = [0u8; 64];
        loop {
            let wait_until = if received.is_empty() {
                deadline
            } else {
                (Instant::now() + self.frame_gap).min(deadline)
            };
            match timeout_at(wait_until, AsyncReadExt::read(&mut self.stream, &mut buffer)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(count)) => received.extend_from_slice(&buffer[..count]),
                Ok(Err(err)) => return Err(err),
            }
        }
        Ok(received)
    }

    async fn flush_input(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPort;
        self.stream.clear(tokio_serial::ClearBuffer::Input)?;
        Ok(())
    }
}

/// Scripted transport double for exercising clients and pollers under faults.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// What the simulated probe does after a request has been written.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        /// Answers within the response window.
        Frame(Vec<u8>),
        /// Stays silent.
        Silence,
        /// Answers after the response window closed; the bytes show up as
        /// stale input of the next exchange.
        Late(Vec<u8>),
        /// The port fails on write.
        Fail(io::ErrorKind),
    }

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        script: VecDeque<Reply>,
        pending: Vec<u8>,
        late: Vec<u8>,
        pub(crate) written: Vec<Vec<u8>>,
        pub(crate) flushes: usize,
        pub(crate) flushed_bytes: usize,
        pub(crate) waits: Vec<Duration>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                script: script.into_iter().collect(),
                ..Default::default()
            }
        }

        /// Queues bytes as if they had arrived unsolicited.
        pub(crate) fn inject_noise(&mut self, bytes: &[u8]) {
            self.pending.extend_from_slice(bytes);
        }

        fn on_write(&mut self, frame: &[u8]) -> io::Result<()> {
            self.written.push(frame.to_vec());
            match self.script.pop_front() {
                Some(Reply::Frame(bytes)) => self.pending.extend(bytes),
                Some(Reply::Late(bytes)) => self.late.extend(bytes),
                Some(Reply::Fail(kind)) => return Err(io::Error::from(kind)),
                Some(Reply::Silence) | None => {}
            }
            Ok(())
        }

        fn on_read(&mut self, max_wait: Duration) -> Vec<u8> {
            self.waits.push(max_wait);
            let received = std::mem::take(&mut self.pending);
            self.pending.append(&mut self.late);
            received
        }

        fn on_flush(&mut self) {
            self.flushes += 1;
            self.flushed_bytes += self.pending.len();
            self.pending.clear();
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, frame: &[u8]) -> io::Result<()> {
            self.on_write(frame)
        }

        fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
            Ok(self.on_read(max_wait))
        }

        fn flush_input(&mut self) -> io::Result<()> {
            self.on_flush();
            Ok(())
        }
    }

    #[cfg(feature = "async")]
    impl AsyncTransport for ScriptedTransport {
        async fn write(&mut self, frame: &[u8]) -> io::Result<()> {
            self.on_write(frame)
        }

        async fn read(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
            Ok(self.on_read(max_wait))
        }

        async fn flush_input(&mut self) -> io::Result<()> {
            self.on_flush();
            Ok(())
        }
    }

    #[test]
    fn late_reply_becomes_stale_input() {
        let mut transport = ScriptedTransport::new([Reply::Late(vec![1, 2, 3])]);
        Transport::write(&mut transport, &[0xAA]).unwrap();
        assert!(Transport::read(&mut transport, Duration::from_millis(100))
            .unwrap()
            .is_empty());
        Transport::flush_input(&mut transport).unwrap();
        assert_eq!(transport.flushed_bytes, 3);
    }
}
