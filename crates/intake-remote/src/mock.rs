//! In-memory remote store for testing.
//!
//! State lives in a `HashMap` behind a [`RwLock`] so all trait methods work
//! on `&self`. Tests drive remote behaviour directly: seeding documents,
//! pushing change notifications, injecting transport failures, and reading
//! call counters to assert how many remote operations the engine issued.

use crate::error::{ErrorKind, Result};
use crate::store::{BlobStore, ChangeStream, DocumentStore};
use crate::types::{BatchOperation, QueryShape, Record, RemoteChange, RemoteDocument, WriteAck};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc};

type Subscriber = mpsc::UnboundedSender<Result<RemoteChange>>;

/// In-memory [`DocumentStore`] for engine tests.
#[derive(Default)]
pub struct MockDocumentStore {
    docs: RwLock<HashMap<String, RemoteDocument>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    reads: AtomicU64,
    writes: AtomicU64,
    batch_commits: AtomicU64,
    queries: AtomicU64,
    offline: AtomicBool,
    fail_next_batches: AtomicU32,
    next_version: AtomicI64,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the network is down; every remote call fails with a
    /// transport error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` batch commits with a transport error, then recover.
    pub fn fail_next_batches(&self, n: u32) {
        self.fail_next_batches.store(n, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn batch_commit_count(&self) -> u64 {
        self.batch_commits.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Insert a document without notifying subscribers (pre-existing remote
    /// state a test starts from).
    pub async fn seed(&self, path: impl Into<String>, payload: impl Into<Vec<u8>>, remote_timestamp: OffsetDateTime) {
        let version = self.bump_version();
        self.docs.write().await.insert(
            path.into(),
            RemoteDocument { payload: payload.into(), version, remote_timestamp },
        );
    }

    /// Deliver a change notification, updating remote state first.
    pub async fn push_change(
        &self,
        path: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        remote_timestamp: OffsetDateTime,
    ) {
        let path = path.into();
        let payload = payload.into();
        let version = self.bump_version();
        let doc = RemoteDocument { payload: payload.clone(), version, remote_timestamp };
        self.docs.write().await.insert(path.clone(), doc);
        self.notify(RemoteChange { path, payload, version, remote_timestamp }).await;
    }

    /// Deliver an in-band transport error on a path's subscription streams.
    pub async fn push_transport_error(&self, path: &str) {
        let mut subs = self.subscribers.write().await;
        if let Some(senders) = subs.get_mut(path) {
            senders.retain(|sender| {
                sender.send(Err(exn::Exn::from(ErrorKind::Transport("injected".into())))).is_ok()
            });
        }
    }

    /// Number of live subscription streams for a path.
    pub async fn subscriber_count(&self, path: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(path)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn bump_version(&self) -> i64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Transport("mock remote is offline".into()));
        }
        Ok(())
    }

    async fn notify(&self, change: RemoteChange) {
        let mut subs = self.subscribers.write().await;
        if let Some(senders) = subs.get_mut(&change.path) {
            // Dropped streams show up as closed senders; prune as we go.
            senders.retain(|sender| sender.send(Ok(change.clone())).is_ok());
        }
    }

    async fn apply(&self, op: &BatchOperation, ack: WriteAck) -> Result<()> {
        let mut docs = self.docs.write().await;
        match op {
            BatchOperation::Set { target, payload } => {
                docs.insert(
                    target.clone(),
                    RemoteDocument {
                        payload: payload.clone(),
                        version: ack.version,
                        remote_timestamp: ack.remote_timestamp,
                    },
                );
            },
            BatchOperation::Update { target, patch } => {
                let existing = docs
                    .get(target)
                    .and_then(|doc| serde_json::from_slice::<Value>(&doc.payload).ok())
                    .unwrap_or(Value::Null);
                let merged = merge(existing, patch.clone());
                let payload = serde_json::to_vec(&merged).or_raise(|| ErrorKind::Rejected("unserializable patch".into()))?;
                docs.insert(
                    target.clone(),
                    RemoteDocument { payload, version: ack.version, remote_timestamp: ack.remote_timestamp },
                );
            },
            BatchOperation::Delete { target } => {
                docs.remove(target);
            },
        }
        Ok(())
    }
}

/// Shallow-merge `patch` over `base` at the top level of two JSON objects.
fn merge(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        },
        (_, patch) => patch,
    }
}

/// Resolve a dotted field path inside a JSON value.
fn field_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<RemoteDocument>> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, payload: Vec<u8>) -> Result<WriteAck> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let ack = WriteAck { version: self.bump_version(), remote_timestamp: OffsetDateTime::now_utc() };
        self.docs.write().await.insert(
            path.to_string(),
            RemoteDocument { payload: payload.clone(), version: ack.version, remote_timestamp: ack.remote_timestamp },
        );
        self.notify(RemoteChange {
            path: path.to_string(),
            payload,
            version: ack.version,
            remote_timestamp: ack.remote_timestamp,
        })
        .await;
        Ok(ack)
    }

    async fn batch_write(&self, ops: Vec<BatchOperation>) -> Result<WriteAck> {
        self.check_online()?;
        let remaining = self.fail_next_batches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_batches.store(remaining - 1, Ordering::SeqCst);
            exn::bail!(ErrorKind::Transport("injected batch failure".into()));
        }
        self.batch_commits.fetch_add(1, Ordering::SeqCst);
        let ack = WriteAck { version: self.bump_version(), remote_timestamp: OffsetDateTime::now_utc() };
        for op in &ops {
            self.apply(op, ack).await?;
        }
        Ok(ack)
    }

    async fn run_query(&self, shape: &QueryShape) -> Result<Vec<Record>> {
        self.check_online()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        let prefix = format!("{}/", shape.collection);
        let docs = self.docs.read().await;
        let mut records: Vec<Record> = docs
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, doc)| {
                let fields: Value = serde_json::from_slice(&doc.payload).ok()?;
                Some(Record { path: path.clone(), fields })
            })
            .filter(|record| {
                shape.filters.iter().all(|filter| field_at(&record.fields, &filter.field) == Some(&filter.equals))
            })
            .collect();
        match &shape.order_by {
            Some(field) => records.sort_by(|a, b| {
                let left = field_at(&a.fields, field).map(Value::to_string);
                let right = field_at(&b.fields, field).map(Value::to_string);
                left.cmp(&right)
            }),
            None => records.sort_by(|a, b| a.path.cmp(&b.path)),
        }
        if let Some(cursor) = &shape.page_cursor {
            if let Some(pos) = records.iter().position(|r| &r.path == cursor) {
                records.drain(..=pos);
            }
        }
        records.truncate(shape.page_size as usize);
        Ok(records)
    }

    async fn subscribe(&self, path: &str) -> Result<ChangeStream> {
        self.check_online()?;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        self.subscribers.write().await.entry(path.to_string()).or_default().push(sender);
        Ok(Box::pin(stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        }))
    }
}

/// In-memory [`BlobStore`] for tests.
#[derive(Default)]
pub struct MockBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let url = format!("mock://{path}");
        self.blobs.write().await.insert(url.clone(), (bytes, content_type.to_string()));
        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(url)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(url.to_string())))
    }
}
