pub mod config;
pub mod errors;
pub mod events;
pub mod ids;
pub mod phone;
pub mod transport;

pub use config::{Cooldown, DelayPolicy, DispatcherConfig, PacingConfig, ReconnectPolicy, SendWindow};
pub use errors::DispatchError;
pub use events::{
    DispatchEvent, LoadReceipt, PauseReceipt, ResumeReceipt, SessionStatus, SubmitReceipt,
    ThrottleReason,
};
pub use ids::{DispatchId, SessionName, SubscriberId};
pub use transport::{DisconnectReason, LinkState, Transport, TransportError, TransportEvent};
