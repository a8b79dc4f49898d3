//! Supervises a [`SessionTask`] against its transport's lifecycle events.

use crate::task::{SessionTask, SessionTaskHandle, TaskOutcome};
use async_trait::async_trait;
use parley_transport::{DisconnectReason, TransportEvent};
use parley_types::SessionIdentity;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for the transport's disconnect notice once the task
/// has finished.
const DISCONNECT_WAIT: Duration = Duration::from_secs(5);

/// How long a session may keep draining after the caller hangs up.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callbacks fired once each per session.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// The transport is streaming with a known identity.
    async fn on_client_connected(&self, _task: &SessionTaskHandle, _identity: &SessionIdentity) {}

    /// The transport is closing. A hangup lets the task drain the audio
    /// it already has; any other reason cancels it.
    async fn on_client_disconnected(&self, task: &SessionTaskHandle, reason: &DisconnectReason) {
        if !reason.is_graceful() {
            task.cancel();
        }
    }
}

/// Hooks with the default behavior only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl SessionHooks for DefaultHooks {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub identity: Option<SessionIdentity>,
    pub outcome: TaskOutcome,
    pub disconnect: Option<DisconnectReason>,
    pub connected_fired: bool,
    pub disconnected_fired: bool,
    /// The session hit its maximum duration.
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionRunner {
    max_duration: Option<Duration>,
    drain_timeout: Duration,
    transport_cancel: Option<CancellationToken>,
}

impl Default for SessionRunner {
    fn default() -> Self {
        Self {
            max_duration: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            transport_cancel: None,
        }
    }
}

#[derive(Default)]
struct Fired {
    identity: Option<SessionIdentity>,
    disconnect: Option<DisconnectReason>,
    connected: bool,
    disconnected: bool,
}

impl Fired {
    async fn dispatch<H>(&mut self, event: TransportEvent, handle: &SessionTaskHandle, hooks: &H)
    where
        H: SessionHooks + ?Sized,
    {
        match event {
            TransportEvent::Connected(identity) => {
                if self.connected {
                    warn!(stream_id = %identity.stream_id, "duplicate connect event ignored");
                    return;
                }
                self.connected = true;
                hooks.on_client_connected(handle, &identity).await;
                self.identity = Some(identity);
            }
            TransportEvent::Disconnected(reason) => {
                if self.disconnected {
                    return;
                }
                self.disconnected = true;
                hooks.on_client_disconnected(handle, &reason).await;
                self.disconnect = Some(reason);
            }
        }
    }
}

impl SessionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the session once it has run this long.
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Cancels a session that is still draining this long after a
    /// graceful disconnect.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Token that closes the transport when the task ends on its own, so
    /// the disconnect hook still fires.
    pub fn with_transport_cancel(mut self, token: CancellationToken) -> Self {
        self.transport_cancel = Some(token);
        self
    }

    /// Drives `task` to completion, firing `hooks` as transport events
    /// arrive. Each hook fires at most once.
    pub async fn run<H>(
        &self,
        task: SessionTask,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        hooks: &H,
    ) -> SessionReport
    where
        H: SessionHooks + ?Sized,
    {
        let started = Instant::now();
        let handle = task.handle();
        let mut fired = Fired::default();
        let mut events_open = true;
        let mut timed_out = false;
        let mut drain_by: Option<Instant> = None;

        let deadline = async {
            match self.max_duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let running = task.run();
        tokio::pin!(running);

        let outcome = loop {
            let draining = drain_by;
            let drain = async move {
                match draining {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                outcome = &mut running => break outcome,
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        fired.dispatch(event, &handle, hooks).await;
                        if drain_by.is_none() && fired.disconnected && !handle.is_cancelled() {
                            debug!(
                                timeout_ms = self.drain_timeout.as_millis() as u64,
                                "draining session after hangup"
                            );
                            drain_by = Some(Instant::now() + self.drain_timeout);
                        }
                    }
                    None => events_open = false,
                },
                _ = drain => {
                    warn!(
                        timeout_ms = self.drain_timeout.as_millis() as u64,
                        "session did not drain in time"
                    );
                    drain_by = None;
                    handle.cancel();
                }
                _ = &mut deadline, if !timed_out => {
                    timed_out = true;
                    warn!(
                        limit_secs = self.max_duration.map(|d| d.as_secs()).unwrap_or_default(),
                        "session reached its maximum duration"
                    );
                    handle.cancel();
                }
            }
        };

        if let Some(token) = &self.transport_cancel {
            token.cancel();
        }
        if events_open {
            self.drain_events(&mut events, &mut fired, &handle, hooks)
                .await;
        }

        // Only the report outlives the session; the stage chain, its
        // queues and the tracker were consumed by `run`.
        drop(handle);

        let report = SessionReport {
            identity: fired.identity,
            outcome,
            disconnect: fired.disconnect,
            connected_fired: fired.connected,
            disconnected_fired: fired.disconnected,
            timed_out,
            elapsed: started.elapsed(),
        };
        info!(
            stream_id = report
                .identity
                .as_ref()
                .map(|identity| identity.stream_id.as_str())
                .unwrap_or(""),
            outcome = ?report.outcome,
            disconnect = ?report.disconnect,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "session finished"
        );
        report
    }

    /// Delivers events that were still queued when the task finished.
    async fn drain_events<H>(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        fired: &mut Fired,
        handle: &SessionTaskHandle,
        hooks: &H,
    ) where
        H: SessionHooks + ?Sized,
    {
        if self.transport_cancel.is_none() {
            while let Ok(event) = events.try_recv() {
                fired.dispatch(event, handle, hooks).await;
            }
            return;
        }

        while !fired.disconnected {
            match tokio::time::timeout(DISCONNECT_WAIT, events.recv()).await {
                Ok(Some(event)) => fired.dispatch(event, handle, hooks).await,
                Ok(None) => break,
                Err(_) => {
                    debug!("transport did not report a disconnect, abandoning hook");
                    break;
                }
            }
        }
    }
}
