//! Typed repositories over the document-store adapter
//!
//! A repository turns models into store documents (`_id`, table tag, created-by
//! and updated-by stamping) and documents back into models.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use super::adapter::{generate_id, to_doc, Adapter, ModelIndexes, OperationKind, PouchFlags, Record};
use super::client::{keys, Doc, MangoQuery};
use super::error::{PersistenceError, Result};

/// A persistable model
pub trait Model: Serialize + DeserializeOwned {
    /// Table (document type) the model is stored under
    const TABLE: &'static str;

    /// Field receiving the acting user's identity on create
    const CREATED_BY: Option<&'static str> = None;

    /// Field receiving the acting user's identity on create, kept on update
    const UPDATED_BY: Option<&'static str> = None;

    /// Primary key, unique within the table
    fn id(&self) -> String;

    /// Fields that get their own index
    fn indexed_fields() -> Vec<&'static str> {
        Vec::new()
    }
}

/// A model together with the revision it was stored at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<M> {
    pub model: M,
    pub rev: Option<String>,
}

pub struct PouchRepository<M: Model> {
    adapter: Arc<dyn Adapter>,
    uuid: Option<String>,
    _model: PhantomData<M>,
}

impl<M: Model> Clone for PouchRepository<M> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            uuid: self.uuid.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> PouchRepository<M> {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            uuid: None,
            _model: PhantomData,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// A repository whose operations act as `uuid`
    pub fn override_flags(&self, uuid: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            ..self.clone()
        }
    }

    /// Create the model's indexes
    pub fn initialize(&self) -> Result<()> {
        let fields = M::indexed_fields();
        self.adapter.index(&[ModelIndexes::new(M::TABLE, &fields)])
    }

    pub fn create(&self, model: &M) -> Result<Versioned<M>> {
        let ctx = self.context(OperationKind::Create);
        let id = model.id();
        let doc = self.prepare(model, &ctx)?;
        let record = self.adapter.create(M::TABLE, &id, doc)?;
        revert(record)
    }

    pub fn create_all(&self, models: &[M]) -> Result<Vec<Versioned<M>>> {
        let ctx = self.context(OperationKind::Create);
        let ids: Vec<String> = models.iter().map(Model::id).collect();
        let docs = models
            .iter()
            .map(|m| self.prepare(m, &ctx))
            .collect::<Result<Vec<Doc>>>()?;
        self.adapter
            .create_all(M::TABLE, &ids, docs)?
            .into_iter()
            .map(revert)
            .collect()
    }

    pub fn read(&self, id: &str) -> Result<Versioned<M>> {
        revert(self.adapter.read(M::TABLE, id)?)
    }

    pub fn read_all(&self, ids: &[String]) -> Result<Vec<Versioned<M>>> {
        self.adapter
            .read_all(M::TABLE, ids)?
            .into_iter()
            .map(revert)
            .collect()
    }

    /// Overwrite the stored model; the current revision is looked up first
    pub fn update(&self, model: &M) -> Result<Versioned<M>> {
        let ctx = self.context(OperationKind::Update);
        let id = model.id();
        let current = self.adapter.read(M::TABLE, &id)?;
        let doc = self.prepare_update(model, &ctx, &current)?;
        revert(self.adapter.update(M::TABLE, &id, doc)?)
    }

    pub fn update_all(&self, models: &[M]) -> Result<Vec<Versioned<M>>> {
        let ctx = self.context(OperationKind::Update);
        let ids: Vec<String> = models.iter().map(Model::id).collect();
        let current = self.adapter.read_all(M::TABLE, &ids)?;
        let docs = models
            .iter()
            .zip(current.iter())
            .map(|(m, c)| self.prepare_update(m, &ctx, c))
            .collect::<Result<Vec<Doc>>>()?;
        self.adapter
            .update_all(M::TABLE, &ids, docs)?
            .into_iter()
            .map(revert)
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<Versioned<M>> {
        revert(self.adapter.delete(M::TABLE, id)?)
    }

    pub fn delete_all(&self, ids: &[String]) -> Result<Vec<Versioned<M>>> {
        self.adapter
            .delete_all(M::TABLE, ids)?
            .into_iter()
            .map(revert)
            .collect()
    }

    /// Models of this table matching `selector`
    pub fn find(&self, selector: Value) -> Result<Vec<M>> {
        self.query(MangoQuery::new(selector))
    }

    /// Run a query restricted to this table; the query's own selector is kept
    pub fn query(&self, mut query: MangoQuery) -> Result<Vec<M>> {
        query.selector = scope_selector(M::TABLE, query.selector);
        let docs = self.adapter.raw(&query, true)?;
        let Value::Array(docs) = docs else {
            return Err(PersistenceError::Internal("Query did not return documents".to_string()));
        };
        docs.into_iter()
            .map(|doc| match doc {
                Value::Object(doc) => Record { doc, metadata: None }.into_model(),
                other => Err(PersistenceError::Internal(format!("Unexpected query row: {}", other))),
            })
            .collect()
    }

    fn context(&self, operation: OperationKind) -> PouchFlags {
        let mut flags = self.adapter.flags(operation, M::TABLE);
        if let Some(uuid) = &self.uuid {
            flags.uuid = uuid.clone();
        }
        flags
    }

    fn prepare(&self, model: &M, ctx: &PouchFlags) -> Result<Doc> {
        let mut doc = to_doc(model)?;
        if ctx.operation == OperationKind::Create {
            for field in [M::CREATED_BY, M::UPDATED_BY].into_iter().flatten() {
                stamp_user(&mut doc, field, ctx)?;
            }
        }
        doc.insert(keys::ID.to_string(), Value::String(generate_id(M::TABLE, &model.id())));
        doc.insert(keys::TABLE.to_string(), Value::String(M::TABLE.to_string()));
        Ok(doc)
    }

    fn prepare_update(&self, model: &M, ctx: &PouchFlags, current: &Record) -> Result<Doc> {
        let mut doc = self.prepare(model, ctx)?;
        // creation stamps are immutable once written
        for field in [M::CREATED_BY, M::UPDATED_BY].into_iter().flatten() {
            if let Some(value) = current.doc.get(field) {
                doc.insert(field.to_string(), value.clone());
            }
        }
        if let Some(rev) = current.rev() {
            doc.insert(keys::REV.to_string(), Value::String(rev.to_string()));
        }
        Ok(doc)
    }
}

fn stamp_user(doc: &mut Doc, field: &str, ctx: &PouchFlags) -> Result<()> {
    if ctx.uuid.is_empty() {
        return Err(PersistenceError::Unsupported(
            "No User found in context. Please provide a user in the context".to_string(),
        ));
    }
    doc.insert(field.to_string(), Value::String(ctx.uuid.clone()));
    Ok(())
}

fn revert<M: Model>(record: Record) -> Result<Versioned<M>> {
    let rev = record.metadata.clone();
    Ok(Versioned {
        model: record.into_model()?,
        rev,
    })
}

/// Restrict a selector to one table
fn scope_selector(table: &str, selector: Value) -> Value {
    match selector {
        Value::Object(mut map) => {
            map.insert(keys::TABLE.to_string(), Value::String(table.to_string()));
            Value::Object(map)
        }
        Value::Null => json!({ (keys::TABLE): table }),
        other => json!({ "$and": [{ (keys::TABLE): table }, other] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_selector() {
        assert_eq!(
            scope_selector("user", json!({"age": {"$gt": 3}})),
            json!({"age": {"$gt": 3}, "??table": "user"})
        );
        assert_eq!(scope_selector("user", Value::Null), json!({"??table": "user"}));
    }
}
