pub mod link;

pub mod mock;

pub use link::{spawn_link, LinkHandle};
pub use mock::{ConnectScript, MockTransport, SentRecord};
