//! Pouch Adapter
//!
//! Implements Adapter on top of any DocumentClient: every operation calls the
//! matching client method, checks the reported success flags, stamps the
//! returned documents with their revision and routes failures through the
//! error classifier.

use once_cell::sync::{Lazy, OnceCell};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::index::{generate_indexes, ModelIndexes};
use super::{
    assign_metadata, assign_multiple_metadata, generate_id, Adapter, OperationKind, PouchFlags,
    Record, POUCH_FLAVOUR,
};
use crate::engine::client::{keys, open_client, BulkDocsItem, Doc, DocumentClient, MangoQuery};
use crate::engine::config::PouchConfig;
use crate::engine::error::{parse_error, PersistenceError, RawError, Result};

static URL_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(.+?):.+?@").expect("valid url user pattern"));

pub struct PouchAdapter {
    alias: String,
    config: Option<PouchConfig>,
    client: OnceCell<Arc<dyn DocumentClient>>,
}

impl PouchAdapter {
    /// Adapter whose client is built from `config` on first use
    pub fn new(config: PouchConfig, alias: Option<&str>) -> Self {
        Self {
            alias: alias.unwrap_or(POUCH_FLAVOUR).to_string(),
            config: Some(config),
            client: OnceCell::new(),
        }
    }

    /// Adapter around an already-open client
    pub fn with_client(client: Arc<dyn DocumentClient>, alias: Option<&str>) -> Self {
        Self {
            alias: alias.unwrap_or(POUCH_FLAVOUR).to_string(),
            config: None,
            client: OnceCell::with_value(client),
        }
    }

    /// The native client, opened once
    pub fn client(&self) -> Result<Arc<dyn DocumentClient>> {
        self.client
            .get_or_try_init(|| match &self.config {
                Some(config) => open_client(config),
                None => Err(PersistenceError::Internal(
                    "Adapter has neither a client nor a configuration".to_string(),
                )),
            })
            .map(Arc::clone)
    }

    /// `raw` deserialized into a caller-chosen shape
    pub fn raw_as<V: DeserializeOwned>(&self, query: &MangoQuery, process: bool) -> Result<V> {
        let value = self.raw(query, process)?;
        Ok(serde_json::from_value(value)?)
    }

    fn write_one(&self, table: &str, id: &str, model: Doc, verb: &str) -> Result<Record> {
        let client = self.client()?;
        let response = client.put(&model).map_err(|e| parse_error(e, None))?;
        if !response.ok {
            return Err(PersistenceError::Internal(format!(
                "Failed to {} doc id: {} in table {}",
                verb, id, table
            )));
        }
        Ok(assign_metadata(model, response.rev))
    }

    fn write_many(&self, table: &str, models: Vec<Doc>, failed: impl Fn(&BulkDocsItem) -> bool) -> Result<Vec<Record>> {
        let client = self.client()?;
        let response = client.bulk_docs(&models).map_err(|e| parse_error(e, None))?;

        if response.iter().any(|item| failed(item)) {
            return Err(PersistenceError::Internal(bulk_error_message(table, &response)));
        }

        let revs = response
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                item.rev
                    .ok_or_else(|| PersistenceError::Internal(format!("el {}: missing revision", i)))
            })
            .collect::<Result<Vec<String>>>()?;
        assign_multiple_metadata(models, revs)
    }

    /// Fetch documents in bulk, failing on the first per-item error
    fn fetch_many(&self, table: &str, ids: &[String]) -> Result<Vec<Record>> {
        let client = self.client()?;
        let full_ids: Vec<String> = ids.iter().map(|id| generate_id(table, id)).collect();
        let response = client.bulk_get(&full_ids).map_err(|e| parse_error(e, None))?;

        let mut records = Vec::new();
        for result in response.results {
            for doc in result.docs {
                if let Some(err) = doc.error {
                    return Err(parse_error(err, None));
                }
                let Some(found) = doc.ok else {
                    return Err(PersistenceError::Internal("Missing valid response".to_string()));
                };
                let rev = found
                    .get(keys::REV)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                records.push(assign_metadata(found, rev));
            }
        }
        Ok(records)
    }
}

fn bulk_error_message(table: &str, items: &[BulkDocsItem]) -> String {
    let errors: Vec<String> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            item.error.as_ref().map(|error| match &item.reason {
                Some(reason) => format!("el {}: {} - {}", i, error, reason),
                None => format!("el {}: {}", i, error),
            })
        })
        .collect();

    if errors.is_empty() {
        format!("Bulk operation on table {} was not acknowledged", table)
    } else {
        errors.join("\n")
    }
}

impl Adapter for PouchAdapter {
    fn flavour(&self) -> &'static str {
        POUCH_FLAVOUR
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    fn create(&self, table: &str, id: &str, model: Doc) -> Result<Record> {
        debug!(table, id, "create");
        self.write_one(table, id, model, "insert")
    }

    fn create_all(&self, table: &str, ids: &[String], models: Vec<Doc>) -> Result<Vec<Record>> {
        debug!(table, count = ids.len(), "create_all");
        self.write_many(table, models, |item| !item.ok)
    }

    fn read(&self, table: &str, id: &str) -> Result<Record> {
        debug!(table, id, "read");
        let client = self.client()?;
        let record = client
            .get(&generate_id(table, id))
            .map_err(|e| parse_error(e, None))?;
        let rev = record
            .get(keys::REV)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(assign_metadata(record, rev))
    }

    fn read_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>> {
        debug!(table, count = ids.len(), "read_all");
        self.fetch_many(table, ids)
    }

    fn update(&self, table: &str, id: &str, model: Doc) -> Result<Record> {
        debug!(table, id, "update");
        self.write_one(table, id, model, "update")
    }

    fn update_all(&self, table: &str, ids: &[String], models: Vec<Doc>) -> Result<Vec<Record>> {
        debug!(table, count = ids.len(), "update_all");
        self.write_many(table, models, |item| item.error.is_some())
    }

    fn delete(&self, table: &str, id: &str) -> Result<Record> {
        debug!(table, id, "delete");
        let client = self.client()?;
        let full_id = generate_id(table, id);
        let record = client.get(&full_id).map_err(|e| parse_error(e, None))?;
        let rev = record
            .get(keys::REV)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        client.remove(&full_id, &rev).map_err(|e| parse_error(e, None))?;
        Ok(assign_metadata(record, rev))
    }

    fn delete_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>> {
        debug!(table, count = ids.len(), "delete_all");
        let records = self.fetch_many(table, ids)?;

        let tombstones: Vec<Doc> = records
            .iter()
            .map(|record| {
                let mut doc = Doc::new();
                if let Some(id) = record.id() {
                    doc.insert(keys::ID.to_string(), Value::String(id.to_string()));
                }
                if let Some(rev) = record.rev() {
                    doc.insert(keys::REV.to_string(), Value::String(rev.to_string()));
                }
                doc.insert(keys::DELETED.to_string(), Value::Bool(true));
                doc
            })
            .collect();

        let client = self.client()?;
        let deletion = client.bulk_docs(&tombstones).map_err(|e| parse_error(e, None))?;
        if deletion.iter().any(|item| item.error.is_some()) {
            return Err(PersistenceError::Internal(bulk_error_message(table, &deletion)));
        }

        Ok(records)
    }

    fn raw(&self, query: &MangoQuery, process: bool) -> Result<Value> {
        let client = self.client()?;
        let response = client.find(query).map_err(|e| parse_error(e, None))?;
        if let Some(warning) = &response.warning {
            warn!(adapter = %self.alias, "{}", warning);
        }
        if process {
            return Ok(Value::Array(response.docs.into_iter().map(Value::Object).collect()));
        }
        Ok(serde_json::to_value(response)?)
    }

    fn index(&self, models: &[ModelIndexes]) -> Result<()> {
        let client = self.client()?;
        for index in generate_indexes(models) {
            let response = client.create_index(&index).map_err(|e| parse_error(e, None))?;
            let name = index.name.as_deref().unwrap_or_default();
            if response.result == "exists" {
                return Err(PersistenceError::Conflict(format!("Index {} already exists", name)));
            }
            debug!(index = name, "index created");
        }
        Ok(())
    }

    fn parse_error(&self, err: RawError, reason: Option<&str>) -> PersistenceError {
        parse_error(err, reason)
    }

    fn flags(&self, operation: OperationKind, table: &str) -> PouchFlags {
        let from_url = self
            .client
            .get()
            .map(|client| client.name().to_string())
            .or_else(|| self.config.as_ref().and_then(PouchConfig::remote_url))
            .and_then(|url| {
                URL_USER
                    .captures(&url)
                    .map(|c| percent_decode_str(&c[1]).decode_utf8_lossy().into_owned())
            });

        PouchFlags {
            operation,
            table: table.to_string(),
            uuid: from_url.unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }
}
