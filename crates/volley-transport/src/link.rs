use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use volley_bus::EventBus;
use volley_core::config::ReconnectPolicy;
use volley_core::events::DispatchEvent;
use volley_core::ids::SessionName;
use volley_core::transport::{DisconnectReason, LinkState, Transport, TransportEvent};

/// Handle to one session's link supervisor task.
///
/// The supervisor owns the connect/reconnect loop: it tracks [`LinkState`],
/// republishes lifecycle signals onto the bus, and re-establishes the link
/// after any non-terminal disconnect. A terminal logout ends the supervisor;
/// the session then stays `Disconnected` until the process is restarted.
pub struct LinkHandle {
    session: SessionName,
    state: Arc<RwLock<LinkState>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LinkHandle {
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn session(&self) -> &SessionName {
        &self.session
    }

    /// Stop supervising. The running connect attempt, if any, is abandoned.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Start supervising one session's transport link.
pub fn spawn_link(
    session: SessionName,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
) -> LinkHandle {
    let state = Arc::new(RwLock::new(LinkState::Disconnected));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(supervise(
        session.clone(),
        transport,
        bus,
        policy,
        Arc::clone(&state),
        cancel.clone(),
    ));

    LinkHandle {
        session,
        state,
        cancel,
        task,
    }
}

async fn supervise(
    session: SessionName,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
    state: Arc<RwLock<LinkState>>,
    cancel: CancellationToken,
) {
    // Consecutive attempts that never reached Connected. Reset on success so
    // max_attempts only bounds a persistent failure streak.
    let mut failed_attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        debug!(session = %session, "opening transport link");
        match transport.connect(&session).await {
            Ok(mut events) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    maybe = events.recv() => match maybe {
                        Some(TransportEvent::PairingChallenge(payload)) => {
                            *state.write() = LinkState::AwaitingPairing;
                            bus.publish(&session, DispatchEvent::PairingChallenge { payload });
                        }
                        Some(TransportEvent::Connected) => {
                            failed_attempts = 0;
                            *state.write() = LinkState::Connected;
                            info!(session = %session, "transport link open");
                            bus.publish(&session, DispatchEvent::Connected);
                        }
                        Some(TransportEvent::Disconnected(reason)) => {
                            *state.write() = LinkState::Disconnected;
                            warn!(session = %session, code = reason.code(), "transport link closed");
                            bus.publish(&session, DispatchEvent::Disconnected {
                                reason: Some(describe(&reason)),
                            });
                            if reason.is_terminal() {
                                info!(session = %session, "logged out, link will not be re-established");
                                return;
                            }
                            break;
                        }
                        None => {
                            // Transport dropped the link without a close signal.
                            *state.write() = LinkState::Disconnected;
                            warn!(session = %session, "transport event stream ended");
                            bus.publish(&session, DispatchEvent::Disconnected { reason: None });
                            break;
                        }
                    }
                }
            },
            Err(err) => {
                *state.write() = LinkState::Disconnected;
                warn!(session = %session, error = %err, "transport connect failed");
            }
        }

        failed_attempts += 1;
        if let Some(max) = policy.max_attempts {
            if failed_attempts >= max {
                warn!(
                    session = %session,
                    attempts = failed_attempts,
                    "reconnect attempts exhausted, giving up"
                );
                return;
            }
        }

        if policy.retry_delay.is_zero() {
            // Zero-delay policy still yields between attempts.
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(policy.retry_delay) => {}
            }
        }
    }
}

fn describe(reason: &DisconnectReason) -> String {
    match reason {
        DisconnectReason::LoggedOut => "logged out".to_string(),
        DisconnectReason::Other(code) => format!("close code {code}"),
    }
}
