//! Remote store contracts.
//!
//! These traits are the abstract boundary between the cache engine and
//! whichever document/blob backend a deployment uses. The concrete wire
//! format is out of scope; the engine only relies on the semantics spelled
//! out here.

use crate::error::Result;
use crate::types::{BatchOperation, QueryShape, Record, RemoteChange, RemoteDocument, WriteAck};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of change notifications for one subscribed path.
///
/// Cancellation is dropping the stream; there is no separate cancel flag.
/// Notifications for the same path arrive in the order the remote delivered
/// them.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<RemoteChange>> + Send + 'static>>;

/// Unified interface for remote document stores.
///
/// All operations are asynchronous. Batch commits are all-or-nothing: either
/// every operation in the batch is applied or none is.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document at `path`. Absence is `Ok(None)`, not an error.
    async fn read(&self, path: &str) -> Result<Option<RemoteDocument>>;

    /// Write a document, replacing any existing payload at `path`.
    async fn write(&self, path: &str, payload: Vec<u8>) -> Result<WriteAck>;

    /// Commit a batch of operations atomically.
    async fn batch_write(&self, ops: Vec<BatchOperation>) -> Result<WriteAck>;

    /// Run a list/query request and return matching records.
    async fn run_query(&self, shape: &QueryShape) -> Result<Vec<Record>>;

    /// Subscribe to change notifications for `path`.
    ///
    /// The stream stays open until dropped. Transport errors are delivered
    /// in-band as `Err` items so the listener can mark affected entries
    /// dirty without tearing the subscription down.
    async fn subscribe(&self, path: &str) -> Result<ChangeStream>;
}

/// Interface for remote blob storage (large uploaded files and archives).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes, returning a stable URL for later download.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Download a blob previously uploaded.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub type DocumentStoreHandle = Arc<dyn DocumentStore>;
pub type BlobStoreHandle = Arc<dyn BlobStore>;
