//! AirPouch CLI Module
//! Command-line interface for raw document operations

pub mod formatter;

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::engine::client::{Doc, MangoQuery, SortDirection};
use crate::engine::config::{ConfigError, PouchConfig, CONFIG_FILE_NAME};

/// Database used when neither the config nor `--db` names one
pub const DEFAULT_DB_NAME: &str = "airpouch";

#[derive(Parser, Debug)]
#[command(name = "airpouch")]
#[command(author = "AirDB Team")]
#[command(version)]
#[command(about = "Raw document operations against a Pouch/CouchDB database", long_about = None)]
pub struct Cli {
    /// Config file (defaults to the user config directory, then a local database)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database name, overriding the config
    #[arg(short, long, global = true)]
    pub db: Option<String>,

    /// Client plugin to open the database with
    #[arg(short, long, global = true)]
    pub adapter: Option<String>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a document
    Get {
        table: String,
        id: String,
    },

    /// Create a document, or overwrite it with --rev
    Put {
        table: String,
        id: String,

        /// Document body as a JSON object
        doc: String,

        /// Current revision; required to update an existing document
        #[arg(short, long)]
        rev: Option<String>,
    },

    /// Delete a document
    Delete {
        table: String,
        id: String,
    },

    /// Run a Mango query
    Find {
        /// Selector as a JSON object
        selector: String,

        /// Sort fields, `-field` for descending
        #[arg(short, long)]
        sort: Vec<String>,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        skip: Option<usize>,

        /// Return the whole store response instead of just the documents
        #[arg(long)]
        raw: bool,
    },

    /// Create the table index plus one index per field
    Index {
        table: String,
        fields: Vec<String>,
    },

    /// Show the resolved connection settings
    Info,
}

impl Cli {
    /// Config file to load: `--config`, else the user config directory when present
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("airpouch").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Resolve the effective configuration, applying `--db` and `--adapter`
    pub fn load_config(&self) -> Result<PouchConfig, ConfigError> {
        let mut config = match self.config_path() {
            Some(path) => PouchConfig::load_file(&path)?,
            None => PouchConfig::local(DEFAULT_DB_NAME),
        };
        if let Some(db) = &self.db {
            config.db_name = db.clone();
        }
        if let Some(adapter) = &self.adapter {
            config.adapter = Some(adapter.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse a JSON argument that must be an object
pub fn parse_object(arg: &str, what: &str) -> Result<Doc, String> {
    match serde_json::from_str::<Value>(arg) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("{} must be a JSON object, got {}", what, other)),
        Err(e) => Err(format!("Invalid {} JSON: {}", what, e)),
    }
}

/// Build a query from `find` arguments
pub fn build_query(selector: Value, sort: &[String], limit: Option<usize>, skip: Option<usize>) -> MangoQuery {
    let mut query = MangoQuery::new(selector);
    for arg in sort {
        query = match arg.strip_prefix('-') {
            Some(field) => query.sort(field, SortDirection::Desc),
            None => query.sort(arg, SortDirection::Asc),
        };
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    if let Some(skip) = skip {
        query = query.skip(skip);
    }
    query
}
