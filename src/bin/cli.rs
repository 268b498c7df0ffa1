//! AirPouch CLI - Main entry point for CLI binary
//!
//! This binary provides the `airpouch` tool for raw document operations.

use airpouch_lib::engine::{
    adapter::{generate_id, Adapter, ModelIndexes, PouchAdapter},
    cli::{
        build_query,
        formatter::{record_json, CliFormatter},
        parse_object, Cli, Commands, OutputFormat,
    },
    client::{
        keys,
        plugins::{register_plugin, registered_plugins, resolve_adapter},
        LocalPlugin,
    },
    config::PouchConfig,
    error::PersistenceError,
    logging,
};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::{json, Value};

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);
    let json_output = cli.format == OutputFormat::Json;

    if let Err(e) = run_cli(cli) {
        if json_output {
            eprintln!("{}", error_json(&e));
        } else {
            CliFormatter::error(&format!("Error: {:#}", e));
        }
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let json_output = cli.format == OutputFormat::Json;
    let config = cli
        .load_config()
        .context("Failed to load configuration")?
        .with_plugin(LocalPlugin::file())
        .with_plugin(LocalPlugin::memory());

    run_command(config, cli.command, json_output)
}

/// `{"error": kind, "message": ...}`, with the persistence kind when there is one
fn error_json(e: &anyhow::Error) -> Value {
    match e.downcast_ref::<PersistenceError>() {
        Some(err) => json!({ "error": err.kind(), "message": err.message() }),
        None => json!({ "error": "cli", "message": format!("{:#}", e) }),
    }
}

fn run_command(config: PouchConfig, command: Commands, json: bool) -> Result<()> {
    // the client is only opened by the first document operation
    let adapter = PouchAdapter::new(config.clone(), None);

    match command {
        Commands::Info => cmd_info(&config, json)?,
        Commands::Get { table, id } => {
            let record = adapter.read(&table, &id)?;
            if json {
                println!("{}", record_json(&record));
            } else {
                CliFormatter::record(&record);
            }
        }
        Commands::Put { table, id, doc, rev } => {
            let mut doc = parse_object(&doc, "document").map_err(|e| anyhow!(e))?;
            doc.insert(keys::ID.to_string(), json!(generate_id(&table, &id)));
            doc.insert(keys::TABLE.to_string(), json!(table));
            let record = match rev {
                Some(rev) => {
                    doc.insert(keys::REV.to_string(), json!(rev));
                    adapter.update(&table, &id, doc)?
                }
                None => adapter.create(&table, &id, doc)?,
            };
            if json {
                println!("{}", record_json(&record));
            } else {
                CliFormatter::success(&format!(
                    "Stored {} at revision {}",
                    record.id().unwrap_or(&id),
                    record.rev().unwrap_or("-")
                ));
            }
        }
        Commands::Delete { table, id } => {
            let record = adapter.delete(&table, &id)?;
            if json {
                println!("{}", record_json(&record));
            } else {
                CliFormatter::success(&format!("Deleted {}", record.id().unwrap_or(&id)));
            }
        }
        Commands::Find { selector, sort, limit, skip, raw } => {
            let selector = Value::Object(parse_object(&selector, "selector").map_err(|e| anyhow!(e))?);
            let query = build_query(selector, &sort, limit, skip);
            let result = adapter.raw(&query, !raw)?;
            if json {
                println!("{}", result);
            } else {
                match &result {
                    Value::Array(docs) if docs.is_empty() => CliFormatter::info("No documents matched"),
                    Value::Array(docs) => {
                        CliFormatter::header(&format!("{} document(s)", docs.len()));
                        for doc in docs {
                            CliFormatter::document(doc);
                        }
                    }
                    other => CliFormatter::document(other),
                }
            }
        }
        Commands::Index { table, fields } => {
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            adapter.index(&[ModelIndexes::new(&table, &fields)])?;
            if json {
                println!("{}", json!({ "table": table, "fields": fields, "created": true }));
            } else {
                CliFormatter::success(&format!("Created indexes for {}", table));
            }
        }
    }
    Ok(())
}

fn cmd_info(config: &PouchConfig, json: bool) -> Result<()> {
    for plugin in &config.plugins {
        register_plugin(plugin.clone())?;
    }
    let adapter_name = resolve_adapter(config);
    let location = if config.is_remote() {
        config.remote_url().unwrap_or_default()
    } else {
        config.local_path().display().to_string()
    };
    // credentials never leave the process
    let location = redact(&location);

    if json {
        println!(
            "{}",
            json!({
                "db": config.db_name,
                "adapter": adapter_name,
                "remote": config.is_remote(),
                "location": location,
                "plugins": registered_plugins(),
            })
        );
    } else {
        CliFormatter::header("AirPouch Connection");
        CliFormatter::kv("Database", &config.db_name);
        CliFormatter::kv("Adapter", &adapter_name);
        CliFormatter::kv("Mode", if config.is_remote() { "remote" } else { "local" });
        CliFormatter::kv("Location", &location);
        CliFormatter::header("Registered plugins");
        for plugin in registered_plugins() {
            CliFormatter::item(&plugin);
        }
        if config.is_remote() && config.admin_user.is_none() {
            CliFormatter::warning("No admin credentials configured; index creation may be refused");
        }
    }
    Ok(())
}

fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***@{}", &url[..scheme], &url[at + 1..]),
        _ => url.to_string(),
    }
}
