use serde::{Deserialize, Serialize};

use crate::transport::LinkState;

/// Everything a session's observers can see: per-attempt outcomes from the
/// scheduler plus transport lifecycle signals. Wire format is the tagged
/// camelCase shape the dashboards consume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DispatchEvent {
    #[serde(rename = "sent", rename_all = "camelCase")]
    Sent {
        recipient: String,
        message: String,
        progress_percent: u8,
        next_delay_seconds: u64,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        recipient: String,
        message: String,
        progress_percent: u8,
        next_delay_seconds: u64,
        error_detail: String,
    },

    #[serde(rename = "done", rename_all = "camelCase")]
    Done { total_count: usize },

    /// The scheduler is waiting out a pacing gate (quiet hours or a long
    /// cooldown), not a failure.
    #[serde(rename = "throttled", rename_all = "camelCase")]
    Throttled {
        reason: ThrottleReason,
        next_delay_seconds: u64,
    },

    #[serde(rename = "pairingChallenge")]
    PairingChallenge { payload: String },

    #[serde(rename = "connected")]
    Connected,

    #[serde(rename = "disconnected")]
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl DispatchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Throttled { .. } => "throttled",
            Self::PairingChallenge { .. } => "pairingChallenge",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    /// The recipient an attempt-level event refers to, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Sent { recipient, .. } | Self::Error { recipient, .. } => {
                Some(recipient.as_str())
            }
            _ => None,
        }
    }

    /// True for connection lifecycle signals, false for scheduler output.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::PairingChallenge { .. } | Self::Connected | Self::Disconnected { .. }
        )
    }
}

/// Which pacing gate produced a `throttled` event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ThrottleReason {
    QuietHours,
    Cooldown,
}

/// Acknowledgement for an accepted dispatch submission.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub accepted: bool,
    pub total_count: usize,
}

/// Cursor position at which the queue was paused.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PauseReceipt {
    pub paused_at: usize,
}

/// Cursor position from which the queue resumed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReceipt {
    pub resumed_at: usize,
}

/// Count of recipients installed by an upload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadReceipt {
    pub loaded_count: usize,
}

/// Point-in-time view of one session: link state plus queue progress.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connection_state: LinkState,
    pub queue_cursor: usize,
    pub queue_length: usize,
    pub paused: bool,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_event_wire_shape() {
        let event = DispatchEvent::Sent {
            recipient: "556199990000".into(),
            message: "oi".into(),
            progress_percent: 34,
            next_delay_seconds: 87,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "sent");
        assert_eq!(json["recipient"], "556199990000");
        assert_eq!(json["message"], "oi");
        assert_eq!(json["progressPercent"], 34);
        assert_eq!(json["nextDelaySeconds"], 87);
    }

    #[test]
    fn error_event_carries_detail() {
        let event = DispatchEvent::Error {
            recipient: "556199990000".into(),
            message: "oi".into(),
            progress_percent: 50,
            next_delay_seconds: 61,
            error_detail: "send timed out".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["errorDetail"], "send timed out");
        assert_eq!(json["progressPercent"], 50);
    }

    #[test]
    fn done_event_reports_total() {
        let json = serde_json::to_value(DispatchEvent::Done { total_count: 3 }).unwrap();
        assert_eq!(json["event"], "done");
        assert_eq!(json["totalCount"], 3);
    }

    #[test]
    fn throttled_event_names_its_gate() {
        let json = serde_json::to_value(DispatchEvent::Throttled {
            reason: ThrottleReason::QuietHours,
            next_delay_seconds: 60,
        })
        .unwrap();
        assert_eq!(json["event"], "throttled");
        assert_eq!(json["reason"], "quietHours");
        assert_eq!(json["nextDelaySeconds"], 60);

        let json = serde_json::to_value(DispatchEvent::Throttled {
            reason: ThrottleReason::Cooldown,
            next_delay_seconds: 900,
        })
        .unwrap();
        assert_eq!(json["reason"], "cooldown");
    }

    #[test]
    fn connected_is_bare() {
        let json = serde_json::to_string(&DispatchEvent::Connected).unwrap();
        assert_eq!(json, r#"{"event":"connected"}"#);
    }

    #[test]
    fn disconnected_omits_absent_reason() {
        let json = serde_json::to_string(&DispatchEvent::Disconnected { reason: None }).unwrap();
        assert_eq!(json, r#"{"event":"disconnected"}"#);

        let json = serde_json::to_value(DispatchEvent::Disconnected {
            reason: Some("stream errored (428)".into()),
        })
        .unwrap();
        assert_eq!(json["reason"], "stream errored (428)");
    }

    #[test]
    fn pairing_challenge_keeps_payload() {
        let event = DispatchEvent::PairingChallenge {
            payload: "qr-blob".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "pairingChallenge");
        assert_eq!(json["payload"], "qr-blob");
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let events = [
            DispatchEvent::Sent {
                recipient: "a".into(),
                message: "m".into(),
                progress_percent: 1,
                next_delay_seconds: 1,
            },
            DispatchEvent::Done { total_count: 1 },
            DispatchEvent::Connected,
            DispatchEvent::Disconnected { reason: None },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.event_type());
        }
    }

    #[test]
    fn recipient_accessor_covers_attempt_events() {
        let sent = DispatchEvent::Sent {
            recipient: "551187654321".into(),
            message: "m".into(),
            progress_percent: 1,
            next_delay_seconds: 1,
        };
        assert_eq!(sent.recipient(), Some("551187654321"));
        assert_eq!(DispatchEvent::Connected.recipient(), None);
        assert!(DispatchEvent::Connected.is_lifecycle());
        assert!(!sent.is_lifecycle());
    }

    #[test]
    fn events_roundtrip_through_serde() {
        let event = DispatchEvent::Error {
            recipient: "r".into(),
            message: "m".into(),
            progress_percent: 99,
            next_delay_seconds: 12,
            error_detail: "boom".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DispatchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn receipts_serialize_camel_case() {
        let json = serde_json::to_value(SubmitReceipt {
            accepted: true,
            total_count: 120,
        })
        .unwrap();
        assert_eq!(json["accepted"], true);
        assert_eq!(json["totalCount"], 120);

        let json = serde_json::to_value(PauseReceipt { paused_at: 7 }).unwrap();
        assert_eq!(json["pausedAt"], 7);

        let json = serde_json::to_value(ResumeReceipt { resumed_at: 7 }).unwrap();
        assert_eq!(json["resumedAt"], 7);

        let json = serde_json::to_value(LoadReceipt { loaded_count: 42 }).unwrap();
        assert_eq!(json["loadedCount"], 42);
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = SessionStatus {
            connection_state: LinkState::Connected,
            queue_cursor: 12,
            queue_length: 300,
            paused: false,
            running: true,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connectionState"], "connected");
        assert_eq!(json["queueCursor"], 12);
        assert_eq!(json["queueLength"], 300);
        assert_eq!(json["paused"], false);
        assert_eq!(json["running"], true);
    }
}
