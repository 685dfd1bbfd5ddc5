use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use volley_core::ids::SessionName;
use volley_core::transport::{DisconnectReason, Transport, TransportError, TransportEvent};

/// Pre-programmed connect outcome for deterministic testing without a real
/// messaging network.
#[derive(Clone)]
pub enum ConnectScript {
    /// Deliver these events, then keep the link open.
    Events(Vec<TransportEvent>),
    /// Deliver these events, then close the event channel as if the
    /// transport dropped the link without a close signal.
    EventsThenClose(Vec<TransportEvent>),
    /// Fail the connect call itself.
    Error(TransportError),
    /// Wait, then run the inner script.
    Delayed(Duration, Box<ConnectScript>),
}

impl ConnectScript {
    /// Convenience: a link that comes straight up and stays up.
    pub fn up() -> Self {
        ConnectScript::Events(vec![TransportEvent::Connected])
    }

    pub fn delayed(delay: Duration, inner: ConnectScript) -> Self {
        ConnectScript::Delayed(delay, Box::new(inner))
    }
}

/// One observed `send` call.
#[derive(Clone, Debug, PartialEq)]
pub struct SentRecord {
    pub session: SessionName,
    pub address: String,
    pub text: String,
}

/// Mock transport that plays back connect scripts in sequence and records
/// every send attempt.
pub struct MockTransport {
    scripts: Mutex<VecDeque<ConnectScript>>,
    /// Used once the scripted connects run out. None means further connects
    /// fail.
    fallback: Option<ConnectScript>,
    send_failures: Mutex<HashMap<String, String>>,
    send_delay: Option<Duration>,
    sends: Mutex<Vec<SentRecord>>,
    connect_calls: AtomicUsize,
    /// Sends fail while the link is down. Starts up so tests can send
    /// without scripting a connect; severed by [`MockTransport::drop_link`]
    /// or a closing script, re-raised when a script delivers `Connected`.
    link_up: Arc<AtomicBool>,
    live_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    shutdown: CancellationToken,
}

impl MockTransport {
    pub fn new(scripts: Vec<ConnectScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: None,
            send_failures: Mutex::new(HashMap::new()),
            send_delay: None,
            sends: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            link_up: Arc::new(AtomicBool::new(true)),
            live_tx: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// A transport where every connect immediately reports a live link.
    pub fn connected() -> Self {
        Self::new(Vec::new()).with_fallback(ConnectScript::up())
    }

    pub fn with_fallback(mut self, script: ConnectScript) -> Self {
        self.fallback = Some(script);
        self
    }

    /// Make every send to `address` fail with `detail`.
    pub fn fail_sends_to(self, address: &str, detail: &str) -> Self {
        self.send_failures
            .lock()
            .insert(address.to_string(), detail.to_string());
        self
    }

    /// Add latency to every send, to simulate a slow network.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Sever the live link mid-run: the open event channel reports the
    /// disconnect and every send fails until a later connect delivers
    /// `Connected` again.
    pub async fn drop_link(&self, reason: DisconnectReason) {
        self.link_up.store(false, Ordering::Relaxed);
        let tx = self.live_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected(reason)).await;
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::Relaxed)
    }

    /// Every send attempt observed so far, in order, failures included.
    pub fn sends(&self) -> Vec<SentRecord> {
        self.sends.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        session: &SessionName,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let idx = self.connect_calls.fetch_add(1, Ordering::Relaxed);

        let script = self.scripts.lock().pop_front().or_else(|| self.fallback.clone());
        let Some(script) = script else {
            return Err(TransportError::ConnectFailed(format!(
                "no connect script configured for call {idx} (session {session})"
            )));
        };

        // Unroll nested delays iteratively.
        let mut current = script;
        let (events, hold_open) = loop {
            match current {
                ConnectScript::Events(events) => break (events, true),
                ConnectScript::EventsThenClose(events) => break (events, false),
                ConnectScript::Error(err) => return Err(err),
                ConnectScript::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        };

        let (tx, rx) = mpsc::channel(events.len().max(1));
        // Only hold a sender for scripts that keep the link open; a closing
        // script must drop every sender so the receiver sees the channel end.
        *self.live_tx.lock() = if hold_open { Some(tx.clone()) } else { None };
        let token = self.shutdown.clone();
        let link_up = Arc::clone(&self.link_up);
        tokio::spawn(async move {
            for event in events {
                if matches!(event, TransportEvent::Connected) {
                    link_up.store(true, Ordering::Relaxed);
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if hold_open {
                // Keep the sender alive so the link looks open until the
                // mock itself is dropped.
                token.cancelled().await;
            } else {
                link_up.store(false, Ordering::Relaxed);
            }
        });
        Ok(rx)
    }

    async fn send(
        &self,
        session: &SessionName,
        address: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }

        self.sends.lock().push(SentRecord {
            session: session.clone(),
            address: address.to_string(),
            text: text.to_string(),
        });

        if !self.link_up.load(Ordering::Relaxed) {
            return Err(TransportError::NotConnected(session.to_string()));
        }
        if let Some(detail) = self.send_failures.lock().get(address) {
            return Err(TransportError::SendRejected(detail.clone()));
        }
        Ok(())
    }
}
