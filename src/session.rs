//! Connected instrument workflow.
//!
//! [`InstrumentSession`] ties one open transport to one instrument profile.
//! It validates the device identity on connect, sends the one-time setup
//! commands of a measurement plan and owns at most one [`Poller`] at a time.
//! Interactive calls made while polling share the transport through the
//! [`ScpiClient`] exclusion lock.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::instrument::{InstrumentProfile, InstrumentType, MeasurementFunction};
use crate::measurement::Reading;
use crate::poller::{PollInterval, PollPlan, PollSink, Poller, PollerConfig, PollerState};
use crate::scpi::ScpiClient;
use std::time::Duration;
use tracing::{info, warn};

/// Identity recorded when the device does not answer the identity query.
pub const UNKNOWN_IDENTITY: &str = "UNKNOWN";

/// Default bound on waiting for a stopped poller to exit.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1500);

/// An open, identity-validated connection to one instrument.
pub struct InstrumentSession {
    profile: &'static InstrumentProfile,
    client: ScpiClient,
    device_identity: String,
    poller: Option<Poller>,
    join_timeout: Duration,
}

impl InstrumentSession {
    /// Opens `transport` and validates the device against `profile`.
    ///
    /// # Errors
    ///
    /// - `Io` if the transport cannot be opened
    /// - `IdentityUnavailable` if the identity query fails or returns nothing
    /// - `IdentityMismatch` if the identity matches none of the profile's tokens
    ///
    /// The transport is closed again on both identity errors.
    pub async fn connect<T: Transport + 'static>(
        profile: &'static InstrumentProfile,
        transport: T,
    ) -> AppResult<Self> {
        Self::connect_with_client(profile, ScpiClient::new(transport)).await
    }

    /// Like [`connect`](Self::connect) for a client built with a custom terminator.
    pub async fn connect_with_client(
        profile: &'static InstrumentProfile,
        client: ScpiClient,
    ) -> AppResult<Self> {
        client.open().await?;

        let identity = match client.query(profile.identity_query).await {
            Ok(identity) if !identity.is_empty() => identity,
            Ok(_) => {
                warn!("{} returned an empty identity", profile.identity_query);
                close_quietly(&client).await;
                return Err(DaqError::IdentityUnavailable);
            }
            Err(e) => {
                warn!("{} failed: {}", profile.identity_query, e);
                close_quietly(&client).await;
                return Err(DaqError::IdentityUnavailable);
            }
        };

        if !profile.matches_identity(&identity) {
            close_quietly(&client).await;
            return Err(DaqError::IdentityMismatch {
                instrument: profile.instrument,
                expected: profile.identity_tokens.join(", "),
                received: identity,
            });
        }

        info!(
            instrument = %profile.instrument,
            identity = %identity,
            "Instrument connected"
        );
        Ok(Self {
            profile,
            client,
            device_identity: identity,
            poller: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        })
    }

    /// Overrides how long [`stop_polling`](Self::stop_polling) waits.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Profile selected for this session.
    pub fn profile(&self) -> &'static InstrumentProfile {
        self.profile
    }

    /// Model selected for this session.
    pub fn instrument(&self) -> InstrumentType {
        self.profile.instrument
    }

    /// Last identity string read from the device.
    pub fn device_identity(&self) -> &str {
        &self.device_identity
    }

    /// Client for ad-hoc commands. Shares the poller's exclusion lock.
    pub fn client(&self) -> &ScpiClient {
        &self.client
    }

    /// Re-queries the device identity and records it.
    ///
    /// A failed or empty answer is recorded as [`UNKNOWN_IDENTITY`].
    pub async fn request_identity(&mut self) -> &str {
        self.device_identity = match self.client.query(self.profile.identity_query).await {
            Ok(identity) if !identity.is_empty() => identity,
            Ok(_) => UNKNOWN_IDENTITY.to_string(),
            Err(e) => {
                warn!("{} failed: {}", self.profile.identity_query, e);
                UNKNOWN_IDENTITY.to_string()
            }
        };
        info!("{} -> {}", self.profile.identity_query, self.device_identity);
        &self.device_identity
    }

    /// State of the current poller, `None` if polling never started.
    pub fn poller_state(&self) -> Option<PollerState> {
        self.poller.as_ref().map(Poller::state)
    }

    /// Whether a polling task is still alive.
    pub fn is_polling(&self) -> bool {
        matches!(
            self.poller_state(),
            Some(PollerState::Running) | Some(PollerState::Stopping)
        )
    }

    /// Sends setup commands and queries every function once, in order.
    ///
    /// # Errors
    ///
    /// `PollingActive` while a poller runs, plan errors before any I/O,
    /// `NotConnected` if the transport was closed, then the first transport
    /// failure.
    pub async fn snapshot(&self, functions: &[MeasurementFunction]) -> AppResult<Vec<Reading>> {
        if self.is_polling() {
            return Err(DaqError::PollingActive);
        }
        let plan = self.prepare(functions).await?;

        let mut readings = Vec::with_capacity(plan.requests.len());
        for request in &plan.requests {
            let raw_response = self.client.query(request.query_command).await?;
            readings.push(Reading::from_response(
                request,
                self.profile.instrument,
                &self.device_identity,
                raw_response,
            ));
        }
        Ok(readings)
    }

    /// Sends setup commands and starts polling `functions` every `interval`.
    ///
    /// # Errors
    ///
    /// `PollingActive` if a poller is still alive, plan errors before any
    /// I/O, `NotConnected` if the transport was closed, or a failed setup
    /// write. Failures after start arrive through
    /// `sink`.
    pub async fn start_polling<S: PollSink>(
        &mut self,
        functions: &[MeasurementFunction],
        interval: PollInterval,
        sink: S,
    ) -> AppResult<()> {
        if self.is_polling() {
            return Err(DaqError::PollingActive);
        }
        self.poller = None;

        let plan = self.prepare(functions).await?;
        let function_list = plan
            .requests
            .iter()
            .map(|r| r.function.label())
            .collect::<Vec<_>>()
            .join(", ");

        let config = PollerConfig {
            instrument: self.profile.instrument,
            device_identity: self.device_identity.clone(),
            requests: plan.requests,
            interval,
        };
        self.poller = Some(Poller::start(self.client.clone(), config, sink));

        info!(
            "Polling started: {} [{}], every {} ms",
            self.profile.instrument.label(),
            function_list,
            interval.as_millis()
        );
        Ok(())
    }

    /// Stops the poller and waits for it up to the join timeout.
    ///
    /// Returns `false` if the task had to be abandoned. No-op without a poller.
    pub async fn stop_polling(&mut self) -> bool {
        let Some(mut poller) = self.poller.take() else {
            return true;
        };
        let joined = poller.stop_and_join(self.join_timeout).await;
        info!("Polling stopped");
        joined
    }

    /// Stops polling and closes the transport.
    pub async fn disconnect(mut self) -> AppResult<()> {
        self.stop_polling().await;
        self.client.close().await?;
        info!("Disconnected from {}", self.profile.instrument);
        Ok(())
    }

    async fn prepare(&self, functions: &[MeasurementFunction]) -> AppResult<PollPlan> {
        let plan = PollPlan::build(self.profile, functions)?;
        if !self.client.is_open().await {
            return Err(DaqError::NotConnected);
        }
        for command in &plan.setup_commands {
            self.client.write(command).await?;
        }
        Ok(plan)
    }
}

async fn close_quietly(client: &ScpiClient) {
    if let Err(e) = client.close().await {
        warn!("Failed to close transport: {}", e);
    }
}
