//! Persistence Error Types
//!
//! The domain error taxonomy exposed to repository code, the error shape reported
//! by document-store clients, and the classifier translating one into the other.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

static CONFLICT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"already exist|update conflict").expect("valid conflict pattern"));
static NOT_FOUND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"missing|deleted").expect("valid not-found pattern"));
static NO_INDEX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"No\sindex\sexists").expect("valid index pattern"));
static CONNECTION_REFUSED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ECONNREFUSED").expect("valid connection pattern"));

/// Errors surfaced to repository code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl PersistenceError {
    /// Short kind name, stable across message changes
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceError::Conflict(_) => "conflict",
            PersistenceError::NotFound(_) => "not_found",
            PersistenceError::Index(_) => "index",
            PersistenceError::Connection(_) => "connection",
            PersistenceError::Unsupported(_) => "unsupported",
            PersistenceError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PersistenceError::Conflict(m)
            | PersistenceError::NotFound(m)
            | PersistenceError::Index(m)
            | PersistenceError::Connection(m)
            | PersistenceError::Unsupported(m)
            | PersistenceError::Internal(m) => m,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<io::Error> for PersistenceError {
    fn from(err: io::Error) -> Self {
        PersistenceError::Internal(format!("IO error: {}", err))
    }
}

/// Error object as reported by a document-store client.
///
/// Mirrors the CouchDB error body (`error`, `reason`) plus the transport-level
/// fields HTTP stacks attach (`status`, `code`, `statusCode`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// CouchDB error name, e.g. `conflict` or `not_found`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ClientError {
    /// Error carrying an HTTP-like status, the way the store reports rejected requests
    pub fn with_status(status: u16, error: &str, reason: &str) -> Self {
        Self {
            status: Some(status),
            error: Some(error.to_string()),
            reason: Some(reason.to_string()),
            message: reason.to_string(),
            ..Default::default()
        }
    }

    /// Error raised below HTTP, identified by a symbolic code (`ECONNREFUSED`, ...)
    pub fn transport(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Human readable description: message, falling back to reason then error name
    pub fn describe(&self) -> String {
        if !self.message.is_empty() {
            return self.message.clone();
        }
        self.reason
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_default()
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.error) {
            (Some(status), Some(name)) => write!(f, "{} {}: {}", status, name, self.describe()),
            (Some(status), None) => write!(f, "{}: {}", status, self.describe()),
            _ => write!(f, "{}", self.describe()),
        }
    }
}

impl std::error::Error for ClientError {}

/// Any error shape the classifier accepts
#[derive(Debug, Clone)]
pub enum RawError {
    Domain(PersistenceError),
    Message(String),
    Client(ClientError),
}

impl From<PersistenceError> for RawError {
    fn from(err: PersistenceError) -> Self {
        RawError::Domain(err)
    }
}

impl From<ClientError> for RawError {
    fn from(err: ClientError) -> Self {
        RawError::Client(err)
    }
}

impl From<String> for RawError {
    fn from(msg: String) -> Self {
        RawError::Message(msg)
    }
}

impl From<&str> for RawError {
    fn from(msg: &str) -> Self {
        RawError::Message(msg.to_string())
    }
}

/// Translate a client error shape into the domain taxonomy.
///
/// Already-classified errors pass through untouched, so the function is idempotent.
pub fn parse_error(err: impl Into<RawError>, reason: Option<&str>) -> PersistenceError {
    let (code, message, reason) = match err.into() {
        RawError::Domain(err) => return err,
        RawError::Message(msg) => {
            if CONFLICT_PATTERN.is_match(&msg) {
                return PersistenceError::Conflict(msg);
            }
            if NOT_FOUND_PATTERN.is_match(&msg) {
                return PersistenceError::NotFound(msg);
            }
            let reason = reason.map(str::to_string).unwrap_or_else(|| msg.clone());
            (msg.clone(), msg, reason)
        }
        RawError::Client(err) => {
            let message = err.describe();
            let code = err
                .status
                .map(|s| s.to_string())
                .or_else(|| err.code.clone())
                .or_else(|| err.status_code.map(|s| s.to_string()))
                .unwrap_or_else(|| message.clone());
            let reason = reason.map(str::to_string).unwrap_or_else(|| message.clone());
            (code, message, reason)
        }
    };

    match code.as_str() {
        "401" | "412" | "409" => PersistenceError::Conflict(reason),
        "404" => PersistenceError::NotFound(reason),
        "400" => {
            if NO_INDEX_PATTERN.is_match(&message) {
                PersistenceError::Index(message)
            } else {
                PersistenceError::Internal(message)
            }
        }
        _ => {
            if CONNECTION_REFUSED_PATTERN.is_match(&code)
                || CONNECTION_REFUSED_PATTERN.is_match(&message)
            {
                PersistenceError::Connection(message)
            } else {
                PersistenceError::Internal(message)
            }
        }
    }
}
