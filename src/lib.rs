//! # Filepipe - Local Files, Shared Live
//!
//! Keeps local files synchronized, in both directions, with entries in a
//! replicated document that remote interfaces read and mutate over a peer
//! connection.
//!
//! ## Features
//!
//! - **Loop-suppressed reconciliation**: remote-triggered disk writes are
//!   fingerprinted so their filesystem echo is never re-broadcast
//! - **Per-interface permissions**: glob rules decide which paths may flow
//!   local -> remote (`r`) or remote -> local (`w`)
//! - **Diff mode**: snapshots two git revisions into parallel read-only
//!   base/head maps, with the head side optionally tracking the working tree
//! - **CRDT-backed**: document merge semantics come from `yrs`, so concurrent
//!   edits converge without coordination

pub mod bridge;
pub mod config;
pub mod diff;
pub mod doc;
pub mod error;
pub mod git;
pub mod permissions;
pub mod session;
pub mod transport;
pub mod watcher;

// Re-export main types for library consumers
pub use bridge::{BridgeEvent, SuppressionTable, SyncBridge};
pub use config::{Config, Interface};
pub use diff::DiffSnapshot;
pub use doc::{DocAction, DocChange, ReplicatedDoc};
pub use permissions::{FileRule, Permission};
pub use session::{DiffRequest, SessionManager};
pub use watcher::{ChangeKind, FileChange, LocalWatcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
