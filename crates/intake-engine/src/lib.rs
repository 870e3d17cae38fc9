//! Client-side document cache and synchronization engine.
//!
//! The engine sits between an application and a remote document/blob backend
//! and exists to make remote operations rare: reads come from a persistent
//! local cache, writes are debounced into bounded batch commits, query
//! results are cached under a short TTL, and a per-operation cost tracker
//! shows what all of it saved.
//!
//! [`CacheEngine`] is the entry point; the submodules are usable on their
//! own when an application only needs one piece (say, the batch coordinator
//! without subscriptions).

pub mod batch;
pub mod engine;
pub mod error;
pub mod listener;
mod mask;
pub mod metrics;
pub mod query;

pub use crate::batch::BatchCoordinator;
pub use crate::engine::{ArchiveUpload, CacheEngine, DocumentData};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::listener::{ChangeCallback, SubscriptionHandle, SyncListener};
pub use crate::metrics::{CostMetrics, CostTracker};
pub use crate::query::QueryCache;
