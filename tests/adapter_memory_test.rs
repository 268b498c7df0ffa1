use airpouch_lib::engine::adapter::{generate_id, Adapter, ModelIndexes, PouchAdapter};
use airpouch_lib::engine::client::plugins::{registered_plugins, MEMORY_ADAPTER};
use airpouch_lib::engine::client::{keys, register_plugin, Doc, LocalPlugin, MangoQuery, SortDirection};
use airpouch_lib::engine::config::PouchConfig;
use airpouch_lib::engine::error::PersistenceError;
use serde_json::{json, Value};

const TABLE: &str = "tst_user";

fn memory_adapter(db: &str) -> PouchAdapter {
    let config = PouchConfig::local(db).with_plugin(LocalPlugin::memory());
    PouchAdapter::new(config, Some(db))
}

fn user(id: &str, name: &str, age: u32) -> Doc {
    let value = json!({
        "_id": generate_id(TABLE, id),
        "??table": TABLE,
        "name": name,
        "age": age,
    });
    value.as_object().cloned().unwrap()
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_client_is_built_from_memory_plugin() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_init");
    let client = adapter.client()?;
    assert_eq!(client.name(), "mem_init");
    assert!(registered_plugins().contains(&MEMORY_ADAPTER.to_string()));

    // same client on every call
    let again = adapter.client()?;
    assert!(std::sync::Arc::ptr_eq(&client, &again));
    Ok(())
}

#[test]
fn test_duplicate_plugin_registration_keeps_first() -> Result<(), Box<dyn std::error::Error>> {
    register_plugin(LocalPlugin::memory())?;
    assert!(!register_plugin(LocalPlugin::memory())?);
    Ok(())
}

#[test]
fn test_unknown_adapter_is_unsupported() {
    let config = PouchConfig::local("mem_unknown").with_adapter("leveldb");
    let adapter = PouchAdapter::new(config, None);
    let err = adapter.client().unwrap_err();
    assert!(matches!(err, PersistenceError::Unsupported(_)), "{:?}", err);
}

#[test]
fn test_crud_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_crud");

    let created = adapter.create(TABLE, "1", user("1", "ann", 30))?;
    assert!(created.rev().unwrap().starts_with("1-"));

    let read = adapter.read(TABLE, "1")?;
    assert_eq!(read.doc["name"], json!("ann"));
    assert_eq!(read.rev(), created.rev());

    let mut changed = read.doc.clone();
    changed.insert("age".to_string(), json!(31));
    let updated = adapter.update(TABLE, "1", changed)?;
    assert!(updated.rev().unwrap().starts_with("2-"));

    let deleted = adapter.delete(TABLE, "1")?;
    assert_eq!(deleted.rev(), updated.rev());
    assert_eq!(deleted.doc["age"], json!(31));
    Ok(())
}

#[test]
fn test_error_classification() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_errors");
    adapter.create(TABLE, "1", user("1", "ann", 30))?;

    let dup = adapter.create(TABLE, "1", user("1", "ann", 30)).unwrap_err();
    assert!(matches!(dup, PersistenceError::Conflict(_)), "{:?}", dup);

    let missing = adapter.read(TABLE, "nope").unwrap_err();
    assert!(matches!(missing, PersistenceError::NotFound(_)), "{:?}", missing);

    let mut stale = user("1", "ann", 99);
    stale.insert(keys::REV.to_string(), json!("1-00000000000000000000000000000000"));
    let conflict = adapter.update(TABLE, "1", stale).unwrap_err();
    assert!(matches!(conflict, PersistenceError::Conflict(_)), "{:?}", conflict);

    adapter.delete(TABLE, "1")?;
    let gone = adapter.delete(TABLE, "1").unwrap_err();
    assert!(matches!(gone, PersistenceError::NotFound(_)), "{:?}", gone);

    let no_id = adapter.create(TABLE, "2", Doc::new()).unwrap_err();
    assert!(matches!(no_id, PersistenceError::Conflict(_)), "{:?}", no_id);
    Ok(())
}

#[test]
fn test_bulk_operations() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_bulk");
    let created = adapter.create_all(
        TABLE,
        &ids(&["1", "2", "3"]),
        vec![user("1", "a", 1), user("2", "b", 2), user("3", "c", 3)],
    )?;
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|r| r.rev().unwrap().starts_with("1-")));

    let read = adapter.read_all(TABLE, &ids(&["3", "1"]))?;
    assert_eq!(read[0].doc["name"], json!("c"));
    assert_eq!(read[1].doc["name"], json!("a"));

    let updates: Vec<Doc> = read
        .iter()
        .map(|r| {
            let mut doc = r.doc.clone();
            doc.insert("age".to_string(), json!(100));
            doc
        })
        .collect();
    let updated = adapter.update_all(TABLE, &ids(&["3", "1"]), updates)?;
    assert!(updated.iter().all(|r| r.rev().unwrap().starts_with("2-")));

    let deleted = adapter.delete_all(TABLE, &ids(&["1", "2"]))?;
    assert_eq!(deleted.len(), 2);
    assert!(matches!(adapter.read(TABLE, "2"), Err(PersistenceError::NotFound(_))));
    assert!(adapter.read(TABLE, "3").is_ok());
    Ok(())
}

#[test]
fn test_bulk_failures_are_aggregated() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_bulk_fail");
    adapter.create(TABLE, "1", user("1", "a", 1))?;

    let err = adapter
        .create_all(TABLE, &ids(&["0", "1"]), vec![user("0", "z", 0), user("1", "a", 1)])
        .unwrap_err();
    match err {
        PersistenceError::Internal(message) => {
            assert_eq!(message, "el 1: conflict - Document update conflict");
        }
        other => panic!("unexpected error {:?}", other),
    }

    let stale = adapter.update_all(TABLE, &ids(&["1"]), vec![user("1", "a", 2)]).unwrap_err();
    assert!(stale.to_string().contains("el 0: conflict"), "{}", stale);
    Ok(())
}

#[test]
fn test_read_all_missing_id_fails() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_read_all_missing");
    adapter.create(TABLE, "1", user("1", "a", 1))?;

    let err = adapter.read_all(TABLE, &ids(&["1", "404"])).unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound(_)), "{:?}", err);

    let err = adapter.delete_all(TABLE, &ids(&["404"])).unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound(_)), "{:?}", err);
    // nothing was deleted
    assert!(adapter.read(TABLE, "1").is_ok());
    Ok(())
}

#[test]
fn test_raw_queries() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_raw");
    adapter.create_all(
        TABLE,
        &ids(&["1", "2", "3"]),
        vec![user("1", "a", 10), user("2", "b", 20), user("3", "c", 30)],
    )?;

    let query = MangoQuery::new(json!({"age": {"$gte": 20}}));
    let docs = adapter.raw(&query, true)?;
    let names: Vec<&str> = docs
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert_eq!(names, vec!["b", "c"]);

    let full = adapter.raw(&query, false)?;
    assert_eq!(full["docs"].as_array().unwrap().len(), 2);
    assert!(full["warning"].as_str().unwrap().starts_with("No matching index found"));

    let sorted = MangoQuery::new(json!({"??table": TABLE})).sort("age", SortDirection::Desc);
    let err = adapter.raw(&sorted, true).unwrap_err();
    assert!(matches!(err, PersistenceError::Index(_)), "{:?}", err);

    adapter.index(&[ModelIndexes::new(TABLE, &["age"])])?;
    let docs = adapter.raw(&sorted, true)?;
    let ages: Vec<i64> = docs
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["age"].as_i64())
        .collect();
    assert_eq!(ages, vec![30, 20, 10]);

    let typed: Vec<Value> = adapter.raw_as(&sorted.clone().limit(1), true)?;
    assert_eq!(typed.len(), 1);
    Ok(())
}

#[test]
fn test_index_twice_conflicts() -> Result<(), Box<dyn std::error::Error>> {
    let adapter = memory_adapter("mem_index");
    let models = [ModelIndexes::new(TABLE, &["name"])];
    adapter.index(&models)?;
    match adapter.index(&models).unwrap_err() {
        PersistenceError::Conflict(message) => {
            assert_eq!(message, "Index tst_user__index already exists");
        }
        other => panic!("unexpected error {:?}", other),
    }
    Ok(())
}

#[test]
fn test_unreachable_remote_is_connection_error() {
    let config = PouchConfig::remote("user", "pw", "127.0.0.1:1", "unreachable");
    let adapter = PouchAdapter::new(config, None);
    let err = adapter.read(TABLE, "1").unwrap_err();
    assert!(matches!(err, PersistenceError::Connection(_)), "{:?}", err);
}
