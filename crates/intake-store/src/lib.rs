//! SQLite-backed content store for cached remote documents.
//!
//! This crate provides the local persistent cache that tracks the last known
//! state of every remote document the portal has seen. The store is not the
//! source of truth - the remote document store is. If the database is
//! deleted, it is rebuilt organically from remote reads and change
//! notifications.
//!
//! # Architecture
//! Two cooperating layers with one consistency rule:
//! - **L1**: an in-memory map for hot entries, always a subset view of L2.
//! - **L2**: a SQLite database (WAL mode, embedded migrations) holding every
//!   entry. L1 and L2 are invalidated together.
//!
//! Entries carry an explicit dirty/fresh flag; the sync engine in
//! `intake-engine` owns the reconciliation rules.

mod db;
mod entry;
pub mod error;
mod store;

pub use crate::db::Database;
pub use crate::entry::CacheEntry;
pub use crate::store::ContentStore;
