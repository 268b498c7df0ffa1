// AirPouch Engine - Core module structure
pub mod adapter;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod repository;

pub use adapter::{Adapter, PouchAdapter, Record};
pub use config::PouchConfig;
pub use error::{parse_error, PersistenceError};
pub use repository::{Model, PouchRepository, Versioned};
