use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use volley_core::events::DispatchEvent;
use volley_core::ids::{SessionName, SubscriberId};

/// Last-known connection-state artifact, replayed to late subscribers so a
/// dashboard that joins mid-session is not left blank.
#[derive(Clone, Debug, PartialEq)]
enum ReplayArtifact {
    /// Pairing still pending; the operator has not scanned the challenge yet.
    Challenge(String),
    Connected,
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<DispatchEvent>,
}

/// One session's fan-out state.
#[derive(Default)]
struct Topic {
    subscribers: RwLock<Vec<Subscriber>>,
    replay: RwLock<Option<ReplayArtifact>>,
}

/// Per-session publish/subscribe fan-out.
///
/// Publishing is fire-and-forget: a full subscriber buffer drops the event
/// for that subscriber, a closed receiver prunes the subscriber, and neither
/// case is ever surfaced to the publisher. Within one session, delivery
/// order matches publish order; across sessions there is no ordering.
pub struct EventBus {
    topics: DashMap<SessionName, Arc<Topic>>,
    buffer: usize,
}

impl EventBus {
    /// `buffer` is the per-subscriber channel capacity.
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    fn topic(&self, session: &SessionName) -> Arc<Topic> {
        self.topics
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Topic::default()))
            .clone()
    }

    /// Register an observer for one session. The session's cached pairing
    /// challenge or connected marker, if any, is delivered immediately.
    pub fn subscribe(
        &self,
        session: &SessionName,
    ) -> (SubscriberId, mpsc::Receiver<DispatchEvent>) {
        let topic = self.topic(session);
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.buffer);

        if let Some(artifact) = topic.replay.read().clone() {
            let replayed = match artifact {
                ReplayArtifact::Challenge(payload) => DispatchEvent::PairingChallenge { payload },
                ReplayArtifact::Connected => DispatchEvent::Connected,
            };
            let _ = tx.try_send(replayed);
        }

        topic.subscribers.write().push(Subscriber {
            id: id.clone(),
            tx,
        });
        debug!(session = %session, subscriber = %id, "observer subscribed");
        (id, rx)
    }

    /// Drop one observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, session: &SessionName, id: &SubscriberId) {
        if let Some(topic) = self.topics.get(session) {
            topic.subscribers.write().retain(|sub| sub.id != *id);
        }
    }

    /// Deliver an event to every current observer of `session`. Never blocks
    /// and never fails; lifecycle events also refresh the replay cache.
    pub fn publish(&self, session: &SessionName, event: DispatchEvent) {
        let topic = self.topic(session);

        match &event {
            DispatchEvent::PairingChallenge { payload } => {
                *topic.replay.write() = Some(ReplayArtifact::Challenge(payload.clone()));
            }
            DispatchEvent::Connected => {
                *topic.replay.write() = Some(ReplayArtifact::Connected);
            }
            DispatchEvent::Disconnected { .. } => {
                *topic.replay.write() = None;
            }
            _ => {}
        }

        let mut subscribers = topic.subscribers.write();
        if subscribers.is_empty() {
            debug!(session = %session, event = event.event_type(), "no observers, event dropped");
            return;
        }

        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session = %session,
                    subscriber = %sub.id,
                    event = event.event_type(),
                    "observer buffer full, event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %session, subscriber = %sub.id, "observer gone, pruned");
                false
            }
        });
    }

    /// Number of live observers for a session.
    pub fn subscriber_count(&self, session: &SessionName) -> usize {
        self.topics
            .get(session)
            .map(|topic| topic.subscribers.read().len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(recipient: &str) -> DispatchEvent {
        DispatchEvent::Sent {
            recipient: recipient.to_string(),
            message: "oi".to_string(),
            progress_percent: 10,
            next_delay_seconds: 60,
        }
    }

    #[test]
    fn subscribe_then_publish_delivers() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        let (_id, mut rx) = bus.subscribe(&session);

        bus.publish(&session, sent("551187654321"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.recipient(), Some("551187654321"));
    }

    #[test]
    fn publish_without_observers_is_silent() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        bus.publish(&session, sent("551187654321"));
        assert_eq!(bus.subscriber_count(&session), 0);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        let (_id, mut rx) = bus.subscribe(&session);

        bus.publish(&session, sent("1"));
        bus.publish(&session, sent("2"));
        bus.publish(&session, DispatchEvent::Done { total_count: 2 });

        assert_eq!(rx.try_recv().unwrap().recipient(), Some("1"));
        assert_eq!(rx.try_recv().unwrap().recipient(), Some("2"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            DispatchEvent::Done { total_count: 2 }
        ));
    }

    #[test]
    fn full_buffer_drops_event_for_that_observer_only() {
        let bus = EventBus::new(2);
        let session = SessionName::from("alpha");
        let (_slow, mut slow_rx) = bus.subscribe(&session);
        let (_fast, mut fast_rx) = bus.subscribe(&session);

        bus.publish(&session, sent("1"));
        bus.publish(&session, sent("2"));
        // Slow observer's buffer is now full; it loses this one.
        fast_rx.try_recv().unwrap();
        fast_rx.try_recv().unwrap();
        bus.publish(&session, sent("3"));

        assert_eq!(fast_rx.try_recv().unwrap().recipient(), Some("3"));
        assert_eq!(slow_rx.try_recv().unwrap().recipient(), Some("1"));
        assert_eq!(slow_rx.try_recv().unwrap().recipient(), Some("2"));
        assert!(slow_rx.try_recv().is_err());
        // The slow observer stays subscribed for future events.
        assert_eq!(bus.subscriber_count(&session), 2);
    }

    #[test]
    fn closed_observer_is_pruned_on_publish() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        let (_id, rx) = bus.subscribe(&session);
        drop(rx);

        bus.publish(&session, sent("1"));
        assert_eq!(bus.subscriber_count(&session), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        let (id, mut rx) = bus.subscribe(&session);

        bus.unsubscribe(&session, &id);
        bus.publish(&session, sent("1"));

        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(&session), 0);
    }

    #[test]
    fn sessions_are_isolated() {
        let bus = EventBus::new(8);
        let alpha = SessionName::from("alpha");
        let beta = SessionName::from("beta");
        let (_a, mut alpha_rx) = bus.subscribe(&alpha);
        let (_b, mut beta_rx) = bus.subscribe(&beta);

        bus.publish(&alpha, sent("for-alpha"));

        assert_eq!(alpha_rx.try_recv().unwrap().recipient(), Some("for-alpha"));
        assert!(beta_rx.try_recv().is_err());
    }

    #[test]
    fn pending_challenge_is_replayed_on_subscribe() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        bus.publish(
            &session,
            DispatchEvent::PairingChallenge {
                payload: "qr-blob".into(),
            },
        );

        let (_id, mut rx) = bus.subscribe(&session);
        assert_eq!(
            rx.try_recv().unwrap(),
            DispatchEvent::PairingChallenge {
                payload: "qr-blob".into()
            }
        );
    }

    #[test]
    fn connected_marker_supersedes_challenge() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        bus.publish(
            &session,
            DispatchEvent::PairingChallenge {
                payload: "qr-blob".into(),
            },
        );
        bus.publish(&session, DispatchEvent::Connected);

        let (_id, mut rx) = bus.subscribe(&session);
        assert_eq!(rx.try_recv().unwrap(), DispatchEvent::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_clears_replay() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        bus.publish(&session, DispatchEvent::Connected);
        bus.publish(&session, DispatchEvent::Disconnected { reason: None });

        let (_id, mut rx) = bus.subscribe(&session);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scheduler_events_do_not_touch_replay() {
        let bus = EventBus::new(8);
        let session = SessionName::from("alpha");
        bus.publish(&session, DispatchEvent::Connected);
        bus.publish(&session, sent("1"));
        bus.publish(&session, DispatchEvent::Done { total_count: 1 });

        let (_id, mut rx) = bus.subscribe(&session);
        assert_eq!(rx.try_recv().unwrap(), DispatchEvent::Connected);
        assert!(rx.try_recv().is_err());
    }
}
