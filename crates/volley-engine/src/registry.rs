//! Session registry: the command surface of the dispatcher.
//!
//! Holds one transport link, one queue slot, and at most one scheduler task
//! per session from the fixed set registered at startup. Commands mutate
//! queue flags under a lock; the scheduler reads them at its next tick, so
//! no command ever waits for an attempt in flight.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use volley_bus::EventBus;
use volley_core::config::{DispatcherConfig, PacingConfig};
use volley_core::errors::DispatchError;
use volley_core::events::{
    DispatchEvent, LoadReceipt, PauseReceipt, ResumeReceipt, SessionStatus, SubmitReceipt,
};
use volley_core::ids::{SessionName, SubscriberId};
use volley_core::phone;
use volley_core::transport::Transport;
use volley_telemetry::MetricsRecorder;
use volley_transport::{spawn_link, LinkHandle};

use crate::queue::DispatchQueue;
use crate::scheduler::{self, SchedulerContext};

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Per-session state: static identity, dynamic queue and scheduler.
struct SessionEntry {
    link: LinkHandle,
    queue: Arc<Mutex<Option<DispatchQueue>>>,
    resume: Arc<Notify>,
    run: Mutex<Option<RunHandle>>,
}

/// Owns every session. Identities come from configuration at startup and
/// are never added or removed afterwards; anything else is `UnknownSession`.
pub struct SessionRegistry {
    sessions: DashMap<SessionName, Arc<SessionEntry>>,
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    pacing: PacingConfig,
    metrics: Arc<MetricsRecorder>,
}

impl SessionRegistry {
    /// Register the configured sessions and start supervising their links.
    pub fn start(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.subscriber_buffer));
        let sessions = DashMap::new();

        for name in &config.sessions {
            let session = SessionName::from(name.clone());
            if sessions.contains_key(&session) {
                continue;
            }
            let link = spawn_link(
                session.clone(),
                Arc::clone(&transport),
                Arc::clone(&bus),
                config.reconnect.clone(),
            );
            info!(session = %session, "session registered");
            sessions.insert(
                session,
                Arc::new(SessionEntry {
                    link,
                    queue: Arc::new(Mutex::new(None)),
                    resume: Arc::new(Notify::new()),
                    run: Mutex::new(None),
                }),
            );
        }

        Self {
            sessions,
            bus,
            transport,
            pacing: config.pacing,
            metrics,
        }
    }

    fn entry(&self, session: &SessionName) -> Result<Arc<SessionEntry>, DispatchError> {
        self.sessions
            .get(session)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::UnknownSession(session.to_string()))
    }

    /// Accept a new batch and start draining it. Replaces any previous
    /// submission wholesale and restarts from cursor zero.
    pub fn submit_dispatch(
        &self,
        session: &SessionName,
        recipients: Vec<String>,
        messages: Vec<String>,
    ) -> Result<SubmitReceipt, DispatchError> {
        let entry = self.entry(session)?;
        if !entry.link.is_connected() {
            return Err(DispatchError::SessionNotReady(session.to_string()));
        }
        DispatchQueue::validate_submission(&recipients, &messages)?;

        let recipients: Vec<String> =
            recipients.iter().map(|raw| phone::normalize(raw)).collect();
        let total = recipients.len();

        let (dispatch, generation) = {
            let mut guard = entry.queue.lock();
            match guard.as_mut() {
                Some(queue) => {
                    queue.replace(recipients, messages);
                    (queue.id().clone(), queue.generation())
                }
                None => {
                    let queue = DispatchQueue::submitted(recipients, messages);
                    let ids = (queue.id().clone(), queue.generation());
                    *guard = Some(queue);
                    ids
                }
            }
        };

        info!(session = %session, dispatch = %dispatch, total, "dispatch accepted");
        self.spawn_run(session, &entry, generation);
        Ok(SubmitReceipt {
            accepted: true,
            total_count: total,
        })
    }

    /// Stop ticking after the attempt in flight, if any, resolves.
    pub fn pause(&self, session: &SessionName) -> Result<PauseReceipt, DispatchError> {
        let entry = self.entry(session)?;
        let mut guard = entry.queue.lock();
        let queue = guard
            .as_mut()
            .ok_or_else(|| DispatchError::NoActiveQueue(session.to_string()))?;
        queue.set_paused(true);
        info!(session = %session, cursor = queue.cursor(), "dispatch paused");
        Ok(PauseReceipt {
            paused_at: queue.cursor(),
        })
    }

    /// Resume ticking from the preserved cursor. Restarts the scheduler if
    /// the previous run already wound down (exhausted queue, fresh upload).
    pub fn resume(&self, session: &SessionName) -> Result<ResumeReceipt, DispatchError> {
        let entry = self.entry(session)?;
        let (cursor, generation, respawn) = {
            let mut guard = entry.queue.lock();
            let queue = guard
                .as_mut()
                .ok_or_else(|| DispatchError::NoQueueLoaded(session.to_string()))?;
            if queue.variants().is_empty() {
                return Err(DispatchError::Validation(
                    "no message variants loaded; submit a dispatch first".into(),
                ));
            }
            queue.set_paused(false);
            let respawn = !queue.running();
            if respawn {
                queue.set_running(true);
            }
            (queue.cursor(), queue.generation(), respawn)
        };

        info!(session = %session, cursor, "dispatch resumed");
        if respawn {
            self.spawn_run(session, &entry, generation);
        } else {
            entry.resume.notify_one();
        }
        Ok(ResumeReceipt { resumed_at: cursor })
    }

    /// Upload path: install a recipient list without starting dispatch.
    /// Cursor, pause flag, and any running scheduler are left untouched.
    pub fn load_recipients(
        &self,
        session: &SessionName,
        recipients: Vec<String>,
    ) -> Result<LoadReceipt, DispatchError> {
        let entry = self.entry(session)?;
        DispatchQueue::validate_recipients(&recipients)?;

        let recipients: Vec<String> =
            recipients.iter().map(|raw| phone::normalize(raw)).collect();
        let loaded = recipients.len();

        let mut guard = entry.queue.lock();
        match guard.as_mut() {
            Some(queue) => queue.replace_recipients(recipients),
            None => *guard = Some(DispatchQueue::loaded(recipients)),
        }
        info!(session = %session, loaded, "recipient list loaded");
        Ok(LoadReceipt {
            loaded_count: loaded,
        })
    }

    pub fn status(&self, session: &SessionName) -> Result<SessionStatus, DispatchError> {
        let entry = self.entry(session)?;
        let guard = entry.queue.lock();
        let (cursor, length, paused, running) = match guard.as_ref() {
            Some(queue) => (queue.cursor(), queue.len(), queue.paused(), queue.running()),
            None => (0, 0, false, false),
        };
        Ok(SessionStatus {
            connection_state: entry.link.state(),
            queue_cursor: cursor,
            queue_length: length,
            paused,
            running,
        })
    }

    /// Observe one session's event stream.
    pub fn subscribe(
        &self,
        session: &SessionName,
    ) -> Result<(SubscriberId, mpsc::Receiver<DispatchEvent>), DispatchError> {
        self.entry(session)?;
        Ok(self.bus.subscribe(session))
    }

    pub fn unsubscribe(&self, session: &SessionName, id: &SubscriberId) {
        self.bus.unsubscribe(session, id);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn session_names(&self) -> Vec<SessionName> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop every link supervisor and scheduler task.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.link.shutdown();
            if let Some(run) = entry.run.lock().take() {
                run.cancel.cancel();
                run.task.abort();
            }
        }
    }

    fn spawn_run(&self, session: &SessionName, entry: &SessionEntry, generation: u64) {
        let cancel = CancellationToken::new();
        let predecessor = {
            let mut run = entry.run.lock();
            run.take().map(|old| {
                old.cancel.cancel();
                old.task
            })
        };

        let ctx = SchedulerContext {
            session: session.clone(),
            queue: Arc::clone(&entry.queue),
            transport: Arc::clone(&self.transport),
            bus: Arc::clone(&self.bus),
            pacing: self.pacing.clone(),
            resume: Arc::clone(&entry.resume),
            cancel: cancel.clone(),
            metrics: Arc::clone(&self.metrics),
            generation,
        };
        let task = tokio::spawn(scheduler::run(ctx, predecessor));
        *entry.run.lock() = Some(RunHandle { cancel, task });
    }
}
