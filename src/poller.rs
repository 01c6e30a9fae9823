//! Periodic acquisition of soil readings.
//!
//! A poller owns one client and runs exactly one exchange per tick. The
//! outcome lands in a shared [`ReadingCache`]:
//!
//! * on success the new reading replaces the cached one as a whole and every
//!   subscriber is called once,
//! * on failure the cached reading is kept, the failure counters grow and
//!   the fault is logged. The next attempt waits for the next tick.
//!
//! Consumers pull the latest reading with [`ReadingCache::current`] or get it
//! pushed with [`ReadingCache::subscribe`]. [`ReadingCache::status`] tells
//! "still loading" apart from "currently failing".
//!
//! [`Poller`] drives a blocking client on a worker thread, [`AsyncPoller`]
//! (feature `async`) drives an `async` client in a `tokio` task.
//!
//! # Example
//!
//! ```no_run
//! use soilprobe_lib::{
//!     poller::Poller,
//!     protocol::{Address, BaudRate},
//!     sync_safe_client::SafeClient,
//!     transport::SerialTransport,
//! };
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = SerialTransport::open("/dev/ttyUSB0", &BaudRate::default())?;
//!     let poller = Poller::start(SafeClient::new(port, Address::default()), Duration::from_secs(5))?;
//!     poller.subscribe(|reading| println!("Soil: {reading}"));
//!     std::thread::sleep(Duration::from_secs(60));
//!     poller.stop();
//!     Ok(())
//! }
//! ```
use crate::{
    error::Result,
    protocol::SensorReading,
    sync_safe_client::SafeClient,
    transport::Transport,
};
use log::*;
use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread,
    time::{Duration, Instant},
};

/// Period of the reference deployment.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest accepted period; shorter ones, including zero, are raised to it.
pub const MINIMUM_INTERVAL: Duration = Duration::from_millis(10);

/// Where the polling cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PollPhase {
    /// Waiting for the next tick, or not running.
    #[default]
    Idle,
    /// An exchange is in flight.
    Requesting,
    /// The last exchange delivered a reading.
    Success,
    /// The last exchange failed.
    Failed,
}

/// The latest known good reading, if there ever was one.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// No exchange has succeeded yet.
    NotYetAcquired,
    /// The most recent successfully decoded reading.
    Available(Arc<SensorReading>),
}

impl Acquisition {
    pub fn reading(&self) -> Option<&SensorReading> {
        match self {
            Acquisition::NotYetAcquired => None,
            Acquisition::Available(reading) => Some(reading.as_ref()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Acquisition::Available(..))
    }
}

/// Health counters of the polling cycle.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PollStatus {
    pub phase: PollPhase,
    /// Successful exchanges since start.
    pub successes: u64,
    /// Failed exchanges since start.
    pub failures: u64,
    /// Failed exchanges since the last success.
    pub consecutive_failures: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_success: Option<Instant>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl PollStatus {
    /// Age of the cached reading, `None` if nothing was acquired yet.
    pub fn staleness(&self) -> Option<Duration> {
        self.last_success.map(|at| at.elapsed())
    }
}

type Subscriber = Box<dyn Fn(&SensorReading) + Send + Sync>;

#[derive(Debug, Default)]
struct CacheState {
    reading: Option<Arc<SensorReading>>,
    status: PollStatus,
}

impl CacheState {
    fn acquisition(&self) -> Acquisition {
        match self.reading.as_ref() {
            Some(reading) => Acquisition::Available(reading.clone()),
            None => Acquisition::NotYetAcquired,
        }
    }
}

/// Last known good reading plus poll status, shared between the poller and
/// its consumers.
///
/// The reading and the status change together under one lock.
#[derive(Default)]
pub struct ReadingCache {
    state: RwLock<CacheState>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last known good reading or [`Acquisition::NotYetAcquired`].
    pub fn current(&self) -> Acquisition {
        self.read_state().acquisition()
    }

    /// A snapshot of the poll status.
    pub fn status(&self) -> PollStatus {
        self.read_state().status.clone()
    }

    /// The reading and the status as of the same moment.
    pub fn snapshot(&self) -> (Acquisition, PollStatus) {
        let state = self.read_state();
        (state.acquisition(), state.status.clone())
    }

    /// Registers `hook` to be called once per successful exchange.
    ///
    /// Hooks run on the polling worker, after the cache was updated. A hook
    /// must not subscribe further hooks. A panicking hook is logged and
    /// skipped; polling goes on.
    pub fn subscribe(&self, hook: impl Fn(&SensorReading) + Send + Sync + 'static) {
        lock(&self.subscribers).push(Box::new(hook));
    }

    /// Runs `exchange` as one polling step and records its outcome.
    pub fn poll_once(&self, exchange: impl FnOnce() -> Result<SensorReading>) -> PollPhase {
        self.set_phase(PollPhase::Requesting);
        self.record(exchange())
    }

    /// Records the outcome of one exchange.
    pub fn record(&self, outcome: Result<SensorReading>) -> PollPhase {
        match outcome {
            Ok(reading) => {
                let reading = Arc::new(reading);
                {
                    let mut state = self.write_state();
                    state.reading = Some(reading.clone());
                    let status = &mut state.status;
                    status.phase = PollPhase::Success;
                    status.successes += 1;
                    status.consecutive_failures = 0;
                    status.last_success = Some(Instant::now());
                }
                debug!("Poll succeeded: {reading}");
                self.notify(&reading);
                PollPhase::Success
            }
            Err(err) => {
                let mut state = self.write_state();
                let status = &mut state.status;
                status.phase = PollPhase::Failed;
                status.failures += 1;
                status.consecutive_failures += 1;
                warn!(
                    "Poll failed ({} in a row), keeping last reading: {err}",
                    status.consecutive_failures
                );
                status.last_error = Some(err.to_string());
                PollPhase::Failed
            }
        }
    }

    fn notify(&self, reading: &SensorReading) {
        for (index, hook) in lock(&self.subscribers).iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(reading))).is_err() {
                error!("Subscriber {index} panicked on {reading}");
            }
        }
    }

    fn set_phase(&self, phase: PollPhase) {
        self.write_state().status.phase = phase;
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ReadingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (current, status) = self.snapshot();
        f.debug_struct("ReadingCache")
            .field("current", &current)
            .field("status", &status)
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clamps `interval` to [`MINIMUM_INTERVAL`].
fn checked_interval(interval: Duration) -> Duration {
    if interval < MINIMUM_INTERVAL {
        warn!("Poll interval {interval:?} is below {MINIMUM_INTERVAL:?}, using the minimum");
        MINIMUM_INTERVAL
    } else {
        interval
    }
}

/// Polls a blocking client on a dedicated worker thread.
///
/// The first exchange runs immediately, then one per `interval` (at least
/// [`MINIMUM_INTERVAL`]). Stopping
/// wakes the worker out of its tick wait; an exchange already in flight is
/// bounded by the client's settle time and finishes first.
#[derive(Debug)]
pub struct Poller {
    cache: Arc<ReadingCache>,
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Poller {
    /// Starts polling with a fresh cache.
    pub fn start<T>(client: SafeClient<T>, interval: Duration) -> io::Result<Self>
    where
        T: Transport + Send + 'static,
    {
        Self::with_cache(client, interval, Arc::new(ReadingCache::new()))
    }

    /// Starts polling into an existing cache.
    pub fn with_cache<T>(
        client: SafeClient<T>,
        interval: Duration,
        cache: Arc<ReadingCache>,
    ) -> io::Result<Self>
    where
        T: Transport + Send + 'static,
    {
        let interval = checked_interval(interval);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let worker_cache = cache.clone();
        let worker = thread::Builder::new()
            .name(format!("soilprobe-poller-{}", client.address()))
            .spawn(move || run(client, interval, &worker_cache, shutdown_rx))?;
        Ok(Self {
            cache,
            shutdown: Some(shutdown),
            worker: Some(worker),
        })
    }

    pub fn cache(&self) -> &Arc<ReadingCache> {
        &self.cache
    }

    pub fn current(&self) -> Acquisition {
        self.cache.current()
    }

    pub fn status(&self) -> PollStatus {
        self.cache.status()
    }

    pub fn subscribe(&self, hook: impl Fn(&SensorReading) + Send + Sync + 'static) {
        self.cache.subscribe(hook)
    }

    /// Stops polling and waits for the worker to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the worker's tick wait.
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Poller worker panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T: Transport>(
    client: SafeClient<T>,
    interval: Duration,
    cache: &ReadingCache,
    shutdown: mpsc::Receiver<()>,
) {
    info!("Polling probe {} every {interval:?}", client.address());
    let mut next_tick = Instant::now();
    loop {
        cache.poll_once(|| client.read_all());

        next_tick += interval;
        let now = Instant::now();
        if next_tick <= now {
            // Missed ticks are not caught up.
            next_tick = now + interval;
        }
        match shutdown.recv_timeout(next_tick - now) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    cache.set_phase(PollPhase::Idle);
    info!("Stopped polling probe {}", client.address());
}

#[cfg(feature = "async")]
pub use self::tokio_poller::AsyncPoller;

#[cfg(feature = "async")]
mod tokio_poller {
    use super::*;
    use crate::{async_safe_client::SafeClient, transport::AsyncTransport};
    use tokio::{
        sync::watch,
        task::JoinHandle,
        time::{interval as ticker, MissedTickBehavior},
    };

    /// Polls an `async` client in a `tokio` task.
    ///
    /// Like [`Poller`], an `interval` below [`MINIMUM_INTERVAL`] is raised to it.
    ///
    /// Stopping cancels both the tick wait and an exchange in flight.
    #[derive(Debug)]
    pub struct AsyncPoller {
        cache: Arc<ReadingCache>,
        shutdown: watch::Sender<bool>,
        task: Option<JoinHandle<()>>,
    }

    impl AsyncPoller {
        /// Spawns the polling task with a fresh cache.
        ///
        /// Must be called from within a `tokio` runtime.
        pub fn spawn<T>(client: SafeClient<T>, interval: Duration) -> Self
        where
            T: AsyncTransport + Send + 'static,
        {
            Self::with_cache(client, interval, Arc::new(ReadingCache::new()))
        }

        /// Spawns the polling task writing into an existing cache.
        pub fn with_cache<T>(
            client: SafeClient<T>,
            interval: Duration,
            cache: Arc<ReadingCache>,
        ) -> Self
        where
            T: AsyncTransport + Send + 'static,
        {
            let interval = checked_interval(interval);
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(run(client, interval, cache.clone(), shutdown_rx));
            Self {
                cache,
                shutdown,
                task: Some(task),
            }
        }

        pub fn cache(&self) -> &Arc<ReadingCache> {
            &self.cache
        }

        pub fn current(&self) -> Acquisition {
            self.cache.current()
        }

        pub fn status(&self) -> PollStatus {
            self.cache.status()
        }

        pub fn subscribe(&self, hook: impl Fn(&SensorReading) + Send + Sync + 'static) {
            self.cache.subscribe(hook)
        }

        /// Stops polling and waits for the task to finish.
        pub async fn stop(mut self) {
            self.shutdown.send_replace(true);
            if let Some(task) = self.task.take() {
                if let Err(err) = task.await {
                    error!("Poller task failed: {err}");
                }
            }
        }
    }

    impl Drop for AsyncPoller {
        fn drop(&mut self) {
            self.shutdown.send_replace(true);
        }
    }

    async fn run<T: AsyncTransport>(
        client: SafeClient<T>,
        interval: Duration,
        cache: Arc<ReadingCache>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Polling probe {} every {interval:?}", client.address());
        let mut ticks = ticker(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticks.tick() => {}
                _ = shutdown.changed() => break,
            }
            cache.set_phase(PollPhase::Requesting);
            tokio::select! {
                outcome = client.read_all() => {
                    cache.record(outcome);
                }
                _ = shutdown.changed() => break,
            }
        }
        cache.set_phase(PollPhase::Idle);
        info!("Stopped polling probe {}", client.address());
    }
}
