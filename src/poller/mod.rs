//! Fixed-interval polling of the active measurement slots.
//!
//! A [`Poller`] owns one spawned tokio task per session. Each cycle queries
//! every [`PollRequest`] in slot order and hands the resulting [`Reading`]s
//! to a [`PollSink`]. The wait between cycles subtracts the time the queries
//! took, so the cycle-start cadence does not drift with instrument latency.
//! When queries take longer than the interval, the next cycle starts
//! immediately.
//!
//! Stop is cooperative. It is observed at the top of each cycle, between
//! slot queries and during the inter-cycle wait, never in the middle of a
//! transport frame.
//!
//! ```no_run
//! use bench_daq::adapters::MockTransport;
//! use bench_daq::instrument::{lookup, InstrumentType, MeasurementFunction};
//! use bench_daq::poller::{PollEvent, PollInterval, PollPlan, Poller, PollerConfig};
//! use bench_daq::scpi::ScpiClient;
//! use std::time::Duration;
//!
//! # async fn example() -> bench_daq::error::AppResult<()> {
//! let profile = lookup(InstrumentType::OwonSpe6103);
//! let client = ScpiClient::new(MockTransport::for_instrument(InstrumentType::OwonSpe6103));
//! client.open().await?;
//!
//! let plan = PollPlan::build(profile, &[MeasurementFunction::Voltage])?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PollEvent>();
//! let config = PollerConfig {
//!     instrument: InstrumentType::OwonSpe6103,
//!     device_identity: "OWON,SPE6103".to_string(),
//!     requests: plan.requests,
//!     interval: PollInterval::from_millis(500)?,
//! };
//! let mut poller = Poller::start(client, config, tx);
//! if let Some(PollEvent::Reading(reading)) = rx.recv().await {
//!     println!("{}", reading.display_value());
//! }
//! poller.stop_and_join(Duration::from_millis(1500)).await;
//! # Ok(())
//! # }
//! ```

pub mod plan;

pub use plan::{PollInterval, PollPlan, PollRequest};

use crate::instrument::InstrumentType;
use crate::measurement::Reading;
use crate::scpi::ScpiClient;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Lifecycle of a polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Background task is cycling.
    Running,
    /// Stop requested, in-flight work is unwinding.
    Stopping,
    /// Background task has exited. Terminal.
    Stopped,
}

/// Message from the polling task to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// One successful query.
    Reading(Reading),
    /// Terminal failure. Sent at most once, and nothing follows it.
    Error(String),
}

/// Consumer of poller output.
///
/// `on_reading` is called once per successful query in cycle order;
/// `on_error` at most once per session, after which the task exits.
pub trait PollSink: Send + 'static {
    /// Receives one reading.
    fn on_reading(&mut self, reading: Reading);
    /// Receives the failure that ended the session.
    fn on_error(&mut self, message: String);
}

impl PollSink for mpsc::UnboundedSender<PollEvent> {
    fn on_reading(&mut self, reading: Reading) {
        // consumer may already be gone during shutdown
        let _ = self.send(PollEvent::Reading(reading));
    }

    fn on_error(&mut self, message: String) {
        let _ = self.send(PollEvent::Error(message));
    }
}

/// [`PollSink`] built from a pair of closures.
pub struct CallbackSink<R, E> {
    on_reading: R,
    on_error: E,
}

impl<R, E> CallbackSink<R, E>
where
    R: FnMut(Reading) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    /// Wraps the two callbacks.
    pub fn new(on_reading: R, on_error: E) -> Self {
        Self {
            on_reading,
            on_error,
        }
    }
}

impl<R, E> PollSink for CallbackSink<R, E>
where
    R: FnMut(Reading) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    fn on_reading(&mut self, reading: Reading) {
        (self.on_reading)(reading)
    }

    fn on_error(&mut self, message: String) {
        (self.on_error)(message)
    }
}

/// Everything a polling task needs besides the client and the sink.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Model being polled, copied into every reading
    pub instrument: InstrumentType,
    /// Identity validated at connect time
    pub device_identity: String,
    /// Active slots in order
    pub requests: Vec<PollRequest>,
    /// Nominal time between cycle starts
    pub interval: PollInterval,
}

/// Handle to a running polling session.
///
/// Dropping the handle requests a stop but does not wait for the task.
pub struct Poller {
    stop_tx: watch::Sender<bool>,
    state: Arc<Mutex<PollerState>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawns the polling task on the current tokio runtime.
    ///
    /// The client must already be open and any setup commands sent.
    pub fn start<S: PollSink>(client: ScpiClient, config: PollerConfig, sink: S) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(PollerState::Running));

        let span = info_span!(
            "poller",
            instrument = %config.instrument,
            slots = config.requests.len(),
        );
        let exit_guard = MarkStopped(state.clone());
        let handle = tokio::spawn(
            async move {
                let _exit_guard = exit_guard;
                run(client, config, sink, stop_rx).await;
            }
            .instrument(span),
        );

        Self {
            stop_tx,
            state,
            handle: Some(handle),
        }
    }

    /// Requests cancellation. Idempotent, and a no-op once the task exited.
    pub fn stop(&self) {
        {
            let mut state = lock_state(&self.state);
            if *state == PollerState::Running {
                *state = PollerState::Stopping;
            }
        }
        self.stop_tx.send_replace(true);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        *lock_state(&self.state)
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits up to `timeout` for the task to exit.
    ///
    /// Returns `false` if it is still running afterwards. That case is
    /// logged as a leaked task and is not treated as a poller failure.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                self.handle = None;
                true
            }
            Ok(Err(e)) => {
                warn!("Polling task failed during shutdown: {}", e);
                self.handle = None;
                true
            }
            Err(_) => {
                warn!("Polling task did not stop within {:?}, leaking it", timeout);
                false
            }
        }
    }

    /// [`stop`](Self::stop) followed by [`join`](Self::join).
    pub async fn stop_and_join(&mut self, timeout: Duration) -> bool {
        self.stop();
        self.join(timeout).await
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

struct MarkStopped(Arc<Mutex<PollerState>>);

impl Drop for MarkStopped {
    fn drop(&mut self) {
        *lock_state(&self.0) = PollerState::Stopped;
    }
}

fn lock_state(state: &Mutex<PollerState>) -> std::sync::MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stop_requested(stop_rx: &watch::Receiver<bool>) -> bool {
    *stop_rx.borrow()
}

/// Resolves once a stop is requested or the handle is gone.
async fn stop_signalled(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

async fn run<S: PollSink>(
    client: ScpiClient,
    config: PollerConfig,
    mut sink: S,
    mut stop_rx: watch::Receiver<bool>,
) {
    let interval = config.interval.as_duration();
    info!(interval_ms = config.interval.as_millis(), "Polling started");

    'cycles: loop {
        if stop_requested(&stop_rx) {
            break;
        }
        let cycle_start = Instant::now();

        for request in &config.requests {
            if stop_requested(&stop_rx) {
                break 'cycles;
            }
            match client.query(request.query_command).await {
                Ok(raw_response) => {
                    sink.on_reading(Reading::from_response(
                        request,
                        config.instrument,
                        &config.device_identity,
                        raw_response,
                    ));
                }
                Err(e) => {
                    error!(
                        slot = request.slot_index + 1,
                        command = request.query_command,
                        "Polling halted: {}",
                        e
                    );
                    sink.on_error(format!("{} failed: {}", request.query_command, e));
                    return;
                }
            }
        }

        let remaining = interval.saturating_sub(cycle_start.elapsed());
        if remaining.is_zero() {
            continue;
        }
        tokio::select! {
            _ = sleep(remaining) => {}
            _ = stop_signalled(&mut stop_rx) => break,
        }
    }

    info!("Polling stopped");
}
