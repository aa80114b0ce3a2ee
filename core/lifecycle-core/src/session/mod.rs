//! Cross-invocation session primitives.
//!
//! - [`lock`]: the host-wide exclusive lock serializing UI switches
//! - [`store`]: the persisted mode tag of the last successful switch

mod lock;
mod store;

pub use lock::{ExclusiveSession, SessionLock};
pub use store::{ModeTag, SessionState, StateStore};
