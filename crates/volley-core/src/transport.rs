use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ids::SessionName;

/// Connection lifecycle of one session's transport link.
///
/// Driven entirely by [`TransportEvent`]s: a pairing challenge moves the link
/// to `AwaitingPairing`, a connected signal to `Connected`, and any
/// disconnect back to `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    Disconnected,
    AwaitingPairing,
    Connected,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Why the transport closed a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device was logged out on the remote side. Terminal: the link must
    /// not be re-established without a fresh pairing by the operator.
    LoggedOut,
    /// Any other close code. Eligible for reconnect.
    Other(u16),
}

impl DisconnectReason {
    /// Close code 401 is the logged-out signal; everything else is transient.
    pub fn from_code(code: u16) -> Self {
        if code == 401 {
            DisconnectReason::LoggedOut
        } else {
            DisconnectReason::Other(code)
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }

    pub fn code(&self) -> u16 {
        match self {
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::Other(code) => *code,
        }
    }
}

/// One lifecycle signal for a single session's link.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// One-time pairing artifact (e.g. a QR payload) the operator must
    /// present out-of-band before the link can open.
    PairingChallenge(String),
    Connected,
    Disconnected(DisconnectReason),
}

/// Errors surfaced by the transport boundary.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("session {0} has no open connection")]
    NotConnected(String),

    #[error("send rejected: {0}")]
    SendRejected(String),
}

/// Capability boundary to the messaging network. The core never implements
/// this; it schedules around it.
///
/// `connect` yields the event receiver for that connection attempt; the
/// channel closes when the transport abandons the link. `send` delivers one
/// message best-effort and may take as long as the transport's own timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        session: &SessionName,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send(
        &self,
        session: &SessionName,
        address: &str,
        text: &str,
    ) -> Result<(), TransportError>;
}
