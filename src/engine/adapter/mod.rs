//! Persistence Adapter Layer
//!
//! The operation contract repositories program against, and its document-store
//! implementation `PouchAdapter`.

pub mod index;
pub mod pouch;

pub use index::{generate_indexes, ModelIndexes};
pub use pouch::PouchAdapter;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::client::{keys, Doc, MangoQuery};
use super::error::{PersistenceError, RawError, Result};

/// Flavour identifier of the document-store adapter
pub const POUCH_FLAVOUR: &str = "pouch";

/// Repository-facing adapter contract, implemented by every persistence backend
pub trait Adapter: Send + Sync {
    /// Backend family this adapter belongs to
    fn flavour(&self) -> &'static str;

    /// Name this adapter instance is known by
    fn alias(&self) -> &str;

    /// Insert a prepared document
    fn create(&self, table: &str, id: &str, model: Doc) -> Result<Record>;

    /// Insert several prepared documents in one request
    fn create_all(&self, table: &str, ids: &[String], models: Vec<Doc>) -> Result<Vec<Record>>;

    /// Fetch a document by table and id
    fn read(&self, table: &str, id: &str) -> Result<Record>;

    /// Fetch several documents in one request
    fn read_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>>;

    /// Overwrite a document; the model must carry its current revision
    fn update(&self, table: &str, id: &str, model: Doc) -> Result<Record>;

    /// Overwrite several documents in one request
    fn update_all(&self, table: &str, ids: &[String], models: Vec<Doc>) -> Result<Vec<Record>>;

    /// Delete a document, returning it as it was
    fn delete(&self, table: &str, id: &str) -> Result<Record>;

    /// Delete several documents, returning them as they were
    fn delete_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>>;

    /// Run a native query. With `process` only the matched documents are returned,
    /// otherwise the whole store response.
    fn raw(&self, query: &MangoQuery, process: bool) -> Result<Value>;

    /// Create the indexes the given models declare
    fn index(&self, models: &[ModelIndexes]) -> Result<()>;

    /// Translate a backend error into the domain taxonomy
    fn parse_error(&self, err: RawError, reason: Option<&str>) -> PersistenceError;

    /// Operation flags for a call on `table`
    fn flags(&self, operation: OperationKind, table: &str) -> PouchFlags;
}

/// A document returned by the adapter, stamped with its revision
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub doc: Doc,
    /// Revision the store reported for this document
    pub metadata: Option<String>,
}

impl Record {
    pub fn rev(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.doc.get(keys::ID).and_then(Value::as_str)
    }

    /// Deserialize into a model, dropping store bookkeeping fields
    pub fn into_model<M: DeserializeOwned>(self) -> Result<M> {
        let mut doc = self.doc;
        doc.remove(keys::ID);
        doc.remove(keys::REV);
        doc.remove(keys::DELETED);
        doc.remove(keys::TABLE);
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}

/// Stamp a document with the revision reported for it
pub fn assign_metadata(doc: Doc, rev: impl Into<String>) -> Record {
    Record {
        doc,
        metadata: Some(rev.into()),
    }
}

/// Stamp documents positionally with their revisions
pub fn assign_multiple_metadata(docs: Vec<Doc>, revs: Vec<String>) -> Result<Vec<Record>> {
    if docs.len() != revs.len() {
        return Err(PersistenceError::Internal(format!(
            "Revision count mismatch: {} documents, {} revisions",
            docs.len(),
            revs.len()
        )));
    }
    Ok(docs
        .into_iter()
        .zip(revs)
        .map(|(doc, rev)| assign_metadata(doc, rev))
        .collect())
}

/// Store id for a table-scoped id: `{table}__{id}`
pub fn generate_id(table: &str, id: &str) -> String {
    format!("{}{}{}", table, keys::SEPARATOR, id)
}

/// Serialize a model into a document
pub fn to_doc<M: Serialize>(model: &M) -> Result<Doc> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(PersistenceError::Internal(format!(
            "Models must serialize to JSON objects, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Read => write!(f, "read"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Per-operation context handed to repository hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PouchFlags {
    pub operation: OperationKind,
    pub table: String,
    /// Identity of the acting user: the remote user name, or a random UUID
    pub uuid: String,
}
