//! jsonslab diagnostic binary
//!
//! Builds JSON documents inside a resource manager and reports how the
//! arena and the string pool were used.
//!
//! # Examples
//!
//! ```bash
//! # Bytes a document needs before building it
//! jsonslab required-size data.json
//!
//! # Build it in an arena sized from a config file, then shrink
//! jsonslab measure data.json --config pool.toml --shrink
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use jsonslab::memory::{sizeof_array, sizeof_object, sizeof_string, SLOT_SIZE};
use jsonslab::{DefaultAllocator, PoolConfig, ResourceManager, SlotId};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Inspect arena memory usage of JSON documents
#[derive(Parser, Debug)]
#[command(name = "jsonslab")]
#[command(version = jsonslab::VERSION)]
#[command(about = "Inspect arena memory usage of JSON documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "JSONSLAB_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a document in an arena and print its accounting
    Measure(MeasureArgs),

    /// Print the bytes a document needs without building it
    RequiredSize {
        /// JSON document
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MeasureArgs {
    /// JSON document
    file: PathBuf,

    /// Pool configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Arena size in bytes; defaults to the document's required size
    #[arg(long)]
    capacity: Option<usize>,

    /// Release unused arena capacity after building
    #[arg(long)]
    shrink: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Commands::Measure(args) => measure_command(args),
        Commands::RequiredSize { file } => {
            let document = read_document(&file)?;
            println!("{}", required_size(&document));
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .with_context(|| format!("Invalid log level: {}", cli.log_level))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn read_document(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Bytes needed for the root slot, every member slot and every distinct string
fn required_size(document: &Value) -> usize {
    let mut strings = HashSet::new();
    let slots = SLOT_SIZE + tree_size(document, &mut strings);
    slots + strings.iter().map(|s| sizeof_string(s.len())).sum::<usize>()
}

fn tree_size<'v>(value: &'v Value, strings: &mut HashSet<&'v str>) -> usize {
    match value {
        Value::String(text) => {
            strings.insert(text.as_str());
            0
        }
        Value::Array(items) => {
            sizeof_array(items.len())
                + items
                    .iter()
                    .map(|item| tree_size(item, strings))
                    .sum::<usize>()
        }
        Value::Object(members) => {
            let mut size = sizeof_object(members.len());
            for (key, item) in members {
                strings.insert(key.as_str());
                size += tree_size(item, strings);
            }
            size
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}

/// Copy `value` into slot `id`, stopping quietly once the pools run out
fn import(value: &Value, id: SlotId, resources: &mut ResourceManager) {
    match value {
        Value::Null => {
            resources.set_null(id);
        }
        Value::Bool(flag) => {
            resources.set_bool(id, *flag);
        }
        Value::Number(number) => {
            if let Some(n) = number.as_i64() {
                resources.set_i64(id, n);
            } else if let Some(n) = number.as_u64() {
                resources.set_u64(id, n);
            } else {
                resources.set_f64(id, number.as_f64().unwrap_or_default());
            }
        }
        Value::String(text) => {
            resources.set_string(id, text);
        }
        Value::Array(items) => {
            resources.to_array(id);
            for item in items {
                let child = resources
                    .with_array(id, |array, res| array.add_element(res))
                    .flatten();
                let Some(child) = child else {
                    return;
                };
                import(item, child, resources);
            }
        }
        Value::Object(members) => {
            resources.to_object(id);
            for (key, item) in members {
                let child = resources
                    .with_object(id, |object, res| object.add_member(key, res))
                    .flatten();
                let Some(child) = child else {
                    return;
                };
                import(item, child, resources);
            }
        }
    }
}

fn measure_command(args: MeasureArgs) -> anyhow::Result<()> {
    let document = read_document(&args.file)?;
    let required = required_size(&document);

    let mut config = match &args.config {
        Some(path) => PoolConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PoolConfig {
            initial_capacity: required,
            ..PoolConfig::default()
        },
    };
    if let Some(capacity) = args.capacity {
        config.initial_capacity = capacity;
    }

    let mut resources = ResourceManager::with_config(&config, DefaultAllocator::shared())?;
    let root = resources.alloc_slot();
    if let Some(root) = root {
        import(&document, root, &mut resources);
    }
    if resources.overflowed() {
        warn!(
            required,
            capacity = resources.capacity(),
            "Document did not fit in the arena"
        );
    }

    let reclaimed = args
        .shrink
        .then(|| resources.shrink_to_fit().reclaimed_bytes);
    resources.validate()?;

    let report = serde_json::json!({
        "file": args.file.display().to_string(),
        "required_size": required,
        "nesting": root.map(|id| resources.nesting(id)).unwrap_or(0),
        "reclaimed_bytes": reclaimed,
        "stats": resources.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(size = resources.size(), required, "Measured document");
    Ok(())
}
