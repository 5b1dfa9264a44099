//! Local filesystem mirror backend
//!
//! Mirrors a watched source tree into another local directory. Every
//! operation is wrapped in a [`RetryPolicy`] because source files are
//! frequently still being written when their change event fires; the
//! resulting sharing violations and timeouts are transient.
//!
//! ## Idempotence
//!
//! Filesystem events race with execution. If the source of a copy or the
//! target of a delete is already gone when an operation runs, the
//! operation completes as a successful no-op rather than poisoning the
//! event stream with spurious errors.

mod backend;

pub use backend::LocalBackend;
