//! Filesystem watching and event routing
//!
//! Turns raw OS change notifications into mirror operations:
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher ──→ mpsc::channel ──→ EventRouter ──→ ISyncBackend
//!                                        │
//!                                  ExclusionFilter
//! ```
//!
//! [`watcher::FileWatcher`] wraps the `notify` crate and emits
//! [`watcher::ChangeEvent`] values; [`router::EventRouter`] classifies
//! each event, applies the mapping's exclusion patterns, and invokes
//! exactly one backend operation per event.

pub mod filter;
pub mod router;
pub mod watcher;

pub use filter::ExclusionFilter;
pub use router::EventRouter;
pub use watcher::{ChangeEvent, FileWatcher, PathKind};
