use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use reactivesql::query::executor::from_fn;
use reactivesql::query::response::Row;
use reactivesql::{metrics, EngineConfig, ReactiveSearch, SchemaValidator, Statement};

#[derive(Parser)]
#[command(name = "reactivesql", version, about = "Search-engine style query batches over SQL")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the SQL compiled for a batch of descriptors
    Translate {
        /// JSON file holding a descriptor or an array of descriptors
        file: PathBuf,
    },
}

fn read_batch(file: &Path) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)?;
    Ok(match serde_json::from_str(&contents)? {
        Value::Array(batch) => batch,
        single => vec![single],
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(config.log_level()?)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(addr) = config.metrics_addr {
        match metrics::init_metrics(addr) {
            Ok(()) => info!("Metrics server listening on {}", addr),
            Err(e) => warn!("Failed to initialize metrics: {}", e),
        }
    }

    match cli.command {
        Command::Translate { file } => {
            let batch = read_batch(&file)?;
            // Translation never executes, so no database is attached
            let executor = from_fn(|_statement: Statement| async {
                Err::<Vec<Row>, _>("no database attached".to_string())
            });
            let engine = ReactiveSearch::new(
                config,
                Arc::new(SchemaValidator::new()?),
                Arc::new(executor),
                None,
            );

            let output = match engine.translate(&batch) {
                Ok(translated) => serde_json::to_value(translated)?,
                Err(e) => e.to_response(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
