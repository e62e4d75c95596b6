//! Backend seams consumed by the chat core.
//!
//! The client talks to three managed services: a document store with live
//! subscriptions, an identity provider and a blob store. Each is a trait so
//! the core stays vendor-agnostic; the local implementations in this module
//! (SQLite documents and accounts, filesystem blobs) are what the CLI and the
//! tests run against.

pub mod blobs;
pub mod identity;
pub mod sqlite;
pub mod watch;

pub use blobs::{BlobStore, FsBlobStore};
pub use identity::{IdentityProvider, LocalIdentity, Session};
pub use sqlite::SqliteStore;
pub use watch::{DocumentChange, DocumentWatch};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Replace (or create) a whole document.
    Set {
        collection: String,
        id: String,
        body: Value,
    },
    /// Append one element to an array field, creating the document with an
    /// empty object body if it does not exist yet.
    Append {
        collection: String,
        id: String,
        field: String,
        value: Value,
    },
}

/// An ordered set of mutations committed atomically by
/// [`DocumentStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(mut self, collection: &str, id: &str, body: &T) -> Result<Self> {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            body: serde_json::to_value(body)?,
        });
        Ok(self)
    }

    pub fn append<T: Serialize>(
        mut self,
        collection: &str,
        id: &str,
        field: &str,
        value: &T,
    ) -> Result<Self> {
        self.ops.push(WriteOp::Append {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Vendor-abstracted document database: documents addressed by
/// collection+id, equality queries, atomic array appends, atomic
/// multi-document batches and live subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_raw(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn set_raw(&self, collection: &str, id: &str, body: Value) -> Result<()>;

    /// Equality query on a top-level field of the document body.
    async fn find_by_field(&self, collection: &str, field: &str, value: &str)
        -> Result<Vec<Value>>;

    async fn list(&self, collection: &str) -> Result<Vec<Value>>;

    /// Atomically append one element to an array field. Creates the document
    /// (and the field) if absent.
    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// Apply every op in `batch` atomically: either all mutations become
    /// visible or none do. Watchers observe the post-commit documents.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Live-subscribe to one document. The watch yields the current state
    /// first, then every subsequent change, until stopped or dropped.
    async fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch>;
}

/// Read and decode a document, distinguishing absence from corruption.
pub async fn get_doc<T, S>(store: &S, collection: &str, id: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    match store.get_raw(collection, id).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|source| {
            CoreError::MalformedDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                source,
            }
        }),
        None => Ok(None),
    }
}

/// Encode and write a whole document.
pub async fn set_doc<T, S>(store: &S, collection: &str, id: &str, body: &T) -> Result<()>
where
    T: Serialize,
    S: DocumentStore + ?Sized,
{
    store
        .set_raw(collection, id, serde_json::to_value(body)?)
        .await
}
