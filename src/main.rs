// Allow panic/unwrap/expect in tests (denied globally via Cargo.toml lints)
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::indexing_slicing
    )
)]

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result};
use serde_json::Value;
use softdelete::logging::{init_logging, parse_rotation, LogConfig, LOG_FILENAME};
use softdelete::{
    ClassMetadata, CommitReport, Configuration, Criteria, DocumentRef, DocumentRegistry,
    EventManager, JsonFileCollection, Record, SoftDeleteManager, StoredDocument, ID_FIELD,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Soft delete and restore documents in a JSON file store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one `<collection>.json` file per collection
    #[arg(short, long, env = "SOFTDELETE_STORE", default_value = ".")]
    store: PathBuf,

    /// Config file (default: ~/.softdelete/config.toml)
    #[arg(long, env = "SOFTDELETE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the deletion marker field name
    #[arg(long, env = "SOFTDELETE_FIELD")]
    field: Option<String>,

    /// Enable JSON log format
    #[arg(long, env = "SOFTDELETE_LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Log rotation period: daily, hourly, or never
    #[arg(long, env = "SOFTDELETE_LOG_ROTATION", default_value = "daily")]
    log_rotation: String,

    /// Custom log directory (default: ~/.softdelete/logs)
    #[arg(long, env = "SOFTDELETE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Soft delete documents by id
    Delete(IdArgs),
    /// Restore soft-deleted documents by id
    Restore(IdArgs),
    /// Soft delete every live document matching a filter
    DeleteBy(CriteriaArgs),
    /// Restore every deleted document matching a filter and tags
    RestoreBy(CriteriaArgs),
    /// Print documents of a collection as JSON lines
    List {
        collection: String,
        /// Only deleted documents
        #[arg(long, conflicts_with = "all")]
        deleted: bool,
        /// Live and deleted documents
        #[arg(long)]
        all: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct IdArgs {
    collection: String,
    /// Document ids; parsed as JSON when possible, otherwise taken as strings
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(ClapArgs, Debug)]
struct CriteriaArgs {
    collection: String,
    /// Equality condition `field=value`, repeatable
    #[arg(long = "where", value_parser = parse_assignment)]
    filters: Vec<(String, Value)>,
    /// Tag `field=value` set on delete and required on restore, repeatable
    #[arg(long = "tag", value_parser = parse_assignment)]
    tags: Vec<(String, Value)>,
}

/// Parse a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), parse_value(value)))
        }
        _ => Err(format!("expected field=value, got '{raw}'")),
    }
}

fn to_criteria(pairs: Vec<(String, Value)>) -> Criteria {
    pairs.into_iter().collect()
}

fn load_configuration(args: &Args) -> Result<Configuration> {
    let mut configuration = match args.config.clone().or_else(Configuration::default_path) {
        Some(path) => Configuration::load(&path)?,
        None => Configuration::default(),
    };
    if let Some(field) = &args.field {
        configuration.set_deleted_field_name(field.clone())?;
    }
    Ok(configuration)
}

fn build_manager(store: &std::path::Path, collection: &str, configuration: Configuration) -> SoftDeleteManager {
    let mut registry = DocumentRegistry::new();
    registry.register(ClassMetadata::new(
        collection,
        Arc::new(JsonFileCollection::new(store, collection)),
    ));
    SoftDeleteManager::new(Arc::new(registry), configuration, EventManager::new())
}

async fn schedule_ids(manager: &mut SoftDeleteManager, target: &IdArgs, restore: bool) -> Result<()> {
    let field = manager.configuration().deleted_field_name().to_string();
    let collection = manager.registry().document_collection(&target.collection)?;
    for raw in &target.ids {
        let mut filter = Record::new();
        filter.insert(ID_FIELD.to_string(), parse_value(raw));
        let Some(found) = collection.find_one(&filter).await? else {
            bail!("No document with id {} in {}", raw, target.collection);
        };
        let document = DocumentRef::new(StoredDocument::from_record(&target.collection, found, &field));
        if restore {
            manager.restore(&document)?;
        } else {
            manager.delete(&document)?;
        }
    }
    Ok(())
}

fn print_report(report: &CommitReport) {
    println!(
        "deleted: {} (matched {}), restored: {} (matched {})",
        report.deletes.modified, report.deletes.matched, report.restores.modified, report.restores.matched
    );
}

async fn run(args: Args, configuration: Configuration) -> Result<()> {
    match &args.command {
        Command::Delete(target) | Command::Restore(target) => {
            let restore = matches!(args.command, Command::Restore(_));
            let mut manager = build_manager(&args.store, &target.collection, configuration);
            schedule_ids(&mut manager, target, restore).await?;
            print_report(&manager.flush().await?);
        }
        Command::DeleteBy(target) | Command::RestoreBy(target) => {
            if target.filters.is_empty() && target.tags.is_empty() {
                bail!("Refusing to match every document; pass at least one --where or --tag");
            }
            let mut manager = build_manager(&args.store, &target.collection, configuration);
            let criteria = to_criteria(target.filters.clone());
            let tags = to_criteria(target.tags.clone());
            if matches!(args.command, Command::RestoreBy(_)) {
                manager.restore_by(&target.collection, criteria, tags)?;
            } else {
                manager.delete_by(&target.collection, criteria, tags)?;
            }
            print_report(&manager.flush().await?);
        }
        Command::List {
            collection,
            deleted,
            all,
        } => {
            let manager = build_manager(&args.store, collection, configuration);
            let query = if *all {
                manager.registry().create_query_builder(collection)?
            } else if *deleted {
                manager.create_deleted_query_builder(collection)?
            } else {
                manager.create_query_builder(collection)?
            };
            debug!("Listing {} with filter {:?}", collection, query.filter());
            for record in query.execute().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let log_dir = args.log_dir.clone().unwrap_or_else(|| LogConfig::default().log_dir);
    let log_file = log_dir.join(LOG_FILENAME);
    let log_config = LogConfig {
        log_dir,
        json_format: args.log_json,
        rotation: parse_rotation(&args.log_rotation),
        ..Default::default()
    };
    let _guard = init_logging(log_config).map_err(|e| {
        eyre!(
            "Failed to initialize logging: {e}\nLogs: {}",
            log_file.display()
        )
    })?;

    let configuration = load_configuration(&args)?;
    info!(
        "Using store {} (marker field {})",
        args.store.display(),
        configuration.deleted_field_name()
    );
    run(args, configuration).await
}
