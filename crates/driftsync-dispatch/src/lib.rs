//! Driftsync dispatch engine
//!
//! Serializes mirror operations onto a small pool of persistent backend
//! connections and retries transient failures with a fixed backoff.
//!
//! ## Architecture
//!
//! ```text
//! RemoteBackend ──submit()──→ queue ──→ worker 0 ── connection 0
//!                                  └──→ worker 1 ── connection 1
//! ```
//!
//! Each worker owns exactly one connection, created lazily by an
//! [`IConnectionFactory`] on the worker's first work item. Callers get
//! an [`OpHandle`] per submitted operation and decide themselves whether
//! to await it inline or detach it.

pub mod dispatcher;
pub mod retry;

pub use dispatcher::{Dispatcher, IConnectionFactory, OpHandle};
pub use retry::RetryPolicy;
