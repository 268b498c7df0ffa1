//! Client Plugin Registry
//!
//! Backends are registered once per process under a name and opened on demand by
//! the client factory. Registering a name twice keeps the first registration.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

use super::http::{Credentials, HttpClient};
use super::local::LocalClient;
use super::DocumentClient;
use crate::engine::config::PouchConfig;
use crate::engine::error::{parse_error, PersistenceError, Result};

pub const HTTP_ADAPTER: &str = "http";
pub const MEMORY_ADAPTER: &str = "memory";
pub const FILE_ADAPTER: &str = "file";

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn ClientPlugin>>>> = Lazy::new(|| {
    let mut plugins: HashMap<String, Arc<dyn ClientPlugin>> = HashMap::new();
    plugins.insert(HTTP_ADAPTER.to_string(), Arc::new(HttpPlugin));
    RwLock::new(plugins)
});

/// Where a client should point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTarget {
    Remote {
        url: String,
        credentials: Option<Credentials>,
        admin: Option<Credentials>,
    },
    Local {
        db_name: String,
        path: PathBuf,
    },
}

impl ClientTarget {
    pub fn from_config(config: &PouchConfig) -> Self {
        match config.remote_url() {
            Some(url) if config.is_remote() => ClientTarget::Remote {
                url,
                credentials: config.credentials(),
                admin: config.admin_credentials(),
            },
            _ => ClientTarget::Local {
                db_name: config.db_name.clone(),
                path: config.local_path(),
            },
        }
    }
}

/// A document-store backend that can be registered with the factory
pub trait ClientPlugin: Send + Sync {
    /// Adapter name the plugin registers under
    fn name(&self) -> &str;

    /// Open a client for the given target
    fn open(&self, target: &ClientTarget) -> Result<Arc<dyn DocumentClient>>;

    /// Whether the plugin serves local targets
    fn is_local(&self) -> bool {
        true
    }
}

/// CouchDB over HTTP
pub struct HttpPlugin;

impl ClientPlugin for HttpPlugin {
    fn name(&self) -> &str {
        HTTP_ADAPTER
    }

    fn open(&self, target: &ClientTarget) -> Result<Arc<dyn DocumentClient>> {
        match target {
            ClientTarget::Remote {
                url,
                credentials,
                admin,
            } => {
                let client = HttpClient::new(url, credentials.clone(), admin.clone())
                    .map_err(|e| parse_error(e, None))?;
                Ok(Arc::new(client))
            }
            ClientTarget::Local { db_name, .. } => Err(PersistenceError::Unsupported(format!(
                "The http adapter cannot open local database {}",
                db_name
            ))),
        }
    }

    fn is_local(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalFlavour {
    Memory,
    File,
}

/// In-process stores. Clients are cached per database so every adapter opening
/// the same name sees the same data, the way a shared storage engine would.
pub struct LocalPlugin {
    flavour: LocalFlavour,
    open: Mutex<HashMap<String, Arc<LocalClient>>>,
}

impl LocalPlugin {
    pub fn memory() -> Arc<Self> {
        Arc::new(Self {
            flavour: LocalFlavour::Memory,
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn file() -> Arc<Self> {
        Arc::new(Self {
            flavour: LocalFlavour::File,
            open: Mutex::new(HashMap::new()),
        })
    }
}

impl ClientPlugin for LocalPlugin {
    fn name(&self) -> &str {
        match self.flavour {
            LocalFlavour::Memory => MEMORY_ADAPTER,
            LocalFlavour::File => FILE_ADAPTER,
        }
    }

    fn open(&self, target: &ClientTarget) -> Result<Arc<dyn DocumentClient>> {
        let (db_name, path) = match target {
            ClientTarget::Local { db_name, path } => (db_name, path),
            ClientTarget::Remote { .. } => {
                return Err(PersistenceError::Unsupported(format!(
                    "The {} adapter cannot open remote databases",
                    self.name()
                )))
            }
        };

        let key = match self.flavour {
            LocalFlavour::Memory => db_name.clone(),
            LocalFlavour::File => path.display().to_string(),
        };

        let mut open = self
            .open
            .lock()
            .map_err(|_| PersistenceError::Internal("plugin state poisoned".to_string()))?;
        if let Some(client) = open.get(&key) {
            return Ok(client.clone());
        }

        let client = match self.flavour {
            LocalFlavour::Memory => LocalClient::in_memory(db_name),
            LocalFlavour::File => LocalClient::open(path).map_err(|e| parse_error(e, None))?,
        };
        let client = Arc::new(client);
        open.insert(key, client.clone());
        Ok(client)
    }
}

/// Register a plugin with the process-wide registry.
///
/// Returns `true` when newly registered, `false` when the name was already taken.
pub fn register_plugin(plugin: Arc<dyn ClientPlugin>) -> Result<bool> {
    let name = plugin.name().to_string();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(PersistenceError::Unsupported(format!(
            "Invalid client plugin name: {:?}",
            name
        )));
    }

    let mut registry = REGISTRY
        .write()
        .map_err(|_| PersistenceError::Internal("plugin registry poisoned".to_string()))?;
    if registry.contains_key(&name) {
        debug!(plugin = %name, "plugin already registered");
        return Ok(false);
    }
    info!(plugin = %name, "registered client plugin");
    registry.insert(name, plugin);
    Ok(true)
}

/// Names of every registered plugin, sorted
pub fn registered_plugins() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

fn lookup(name: &str) -> Result<Arc<dyn ClientPlugin>> {
    let registry = REGISTRY
        .read()
        .map_err(|_| PersistenceError::Internal("plugin registry poisoned".to_string()))?;
    registry.get(name).cloned().ok_or_else(|| {
        PersistenceError::Unsupported(format!("No client plugin registered for adapter '{}'", name))
    })
}

/// Adapter name to open `config` with
pub fn resolve_adapter(config: &PouchConfig) -> String {
    if let Some(adapter) = &config.adapter {
        return adapter.clone();
    }
    if config.is_remote() {
        return HTTP_ADAPTER.to_string();
    }
    config
        .plugins
        .iter()
        .find(|p| p.is_local())
        .map(|p| p.name().to_string())
        .unwrap_or_else(|| FILE_ADAPTER.to_string())
}

/// Build a client for `config`, registering its plugins first
pub fn open_client(config: &PouchConfig) -> Result<Arc<dyn DocumentClient>> {
    config
        .validate()
        .map_err(|e| PersistenceError::Unsupported(e.to_string()))?;

    for plugin in &config.plugins {
        register_plugin(plugin.clone())?;
    }

    let adapter = resolve_adapter(config);
    let target = ClientTarget::from_config(config);
    let plugin = lookup(&adapter)?;
    let client = plugin.open(&target)?;
    info!(adapter = %adapter, db = %config.db_name, "opened document client");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BadPlugin;

    impl ClientPlugin for BadPlugin {
        fn name(&self) -> &str {
            ""
        }

        fn open(&self, _target: &ClientTarget) -> Result<Arc<dyn DocumentClient>> {
            Err(PersistenceError::Internal("never".to_string()))
        }
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        register_plugin(LocalPlugin::memory()).unwrap();
        assert!(!register_plugin(LocalPlugin::memory()).unwrap());
        assert!(registered_plugins().contains(&MEMORY_ADAPTER.to_string()));
        assert!(registered_plugins().contains(&HTTP_ADAPTER.to_string()));
    }

    #[test]
    fn test_invalid_plugin_is_rejected() {
        let err = register_plugin(Arc::new(BadPlugin)).unwrap_err();
        assert!(matches!(err, PersistenceError::Unsupported(_)));
    }

    #[test]
    fn test_resolve_adapter() {
        assert_eq!(resolve_adapter(&PouchConfig::local("a")), FILE_ADAPTER);
        assert_eq!(
            resolve_adapter(&PouchConfig::local("a").with_plugin(LocalPlugin::memory())),
            MEMORY_ADAPTER
        );
        assert_eq!(
            resolve_adapter(&PouchConfig::remote("u", "p", "localhost", "a")),
            HTTP_ADAPTER
        );
        assert_eq!(
            resolve_adapter(&PouchConfig::local("a").with_adapter("custom")),
            "custom"
        );
    }

    #[test]
    fn test_target_from_config() {
        let target = ClientTarget::from_config(
            &PouchConfig::remote("u", "p", "localhost:5984", "a").with_admin("root", "pw"),
        );
        match target {
            ClientTarget::Remote {
                url,
                credentials,
                admin,
            } => {
                assert_eq!(url, "http://u:p@localhost:5984/a");
                assert_eq!(credentials.unwrap().password, "p");
                assert_eq!(admin.unwrap().user, "root");
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_memory_clients_are_shared_per_name() {
        let plugin = LocalPlugin::memory();
        let target = ClientTarget::Local {
            db_name: "shared_mem".to_string(),
            path: PathBuf::from("unused"),
        };
        let a = plugin.open(&target).unwrap();
        let b = plugin.open(&target).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
