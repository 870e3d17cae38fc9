//! Abstract remote document and blob store contracts.
//!
//! The cache engine in `intake-engine` talks to remote storage exclusively
//! through the traits in this crate. A concrete backend implements
//! [`DocumentStore`] and [`BlobStore`]; tests use the in-memory mock behind
//! the `mock` feature.

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod store;
mod types;

#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockBlobStore, MockDocumentStore};
pub use crate::store::{BlobStore, BlobStoreHandle, ChangeStream, DocumentStore, DocumentStoreHandle};
pub use crate::types::{BatchOperation, FieldFilter, QueryShape, Record, RemoteChange, RemoteDocument, WriteAck};
