pub mod queue;
pub mod registry;
mod scheduler;

pub use queue::{DispatchQueue, MAX_RECIPIENTS};
pub use registry::SessionRegistry;
