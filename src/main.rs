use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use matrixdata::{
    BatchOperation, InMemoryPlatform, MatrixConfig, MatrixDataService, Record, ServiceOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "matrixdata")]
#[command(about = "Loads, diagnoses and saves junction matrices against a fixture platform")]
#[command(version)]
struct Cli {
    /// JSON fixture holding the matrix config and the records per entity
    #[arg(long, global = true, default_value = "matrix.json")]
    fixture: PathBuf,

    /// Publisher prefix applied to logical names
    #[arg(long, global = true)]
    prefix: Option<String>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the initial matrix and service statistics
    Load {
        #[arg(long)]
        parent: Option<String>,
    },
    /// Report how junction records resolve against the configured fields
    Diagnose {
        #[arg(long, default_value_t = 10)]
        samples: usize,
    },
    /// Apply a batch of creates, updates and deletes, then reload
    Save {
        #[arg(long)]
        batch: PathBuf,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixture {
    config: MatrixConfig,
    #[serde(default)]
    records: HashMap<String, Vec<Record>>,
}

#[derive(Serialize)]
struct Report<T: Serialize> {
    result: T,
    stats: matrixdata::ServiceStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("matrixdata=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let fixture = read_fixture(&cli.fixture)?;

    let mut options = ServiceOptions::from_env().debug_mode(cli.debug);
    if let Some(prefix) = &cli.prefix {
        options = options.publisher_prefix(prefix);
    }

    let platform = Arc::new(InMemoryPlatform::new());
    for (entity, records) in fixture.records {
        for record in records {
            platform.insert(&entity, record);
        }
    }
    let service = MatrixDataService::new(platform, options).context("Invalid service options")?;
    let config = fixture.config;

    match cli.command {
        Command::Load { parent } => {
            let matrix = service
                .load_initial_matrix_data(&config, parent.as_deref())
                .await
                .context("Matrix load failed")?;
            print_report(&service, &matrix)
        }
        Command::Diagnose { samples } => {
            let diagnostics = service
                .diagnose_junction_field_mapping(&config, samples)
                .await
                .context("Junction diagnosis failed")?;
            print_report(&service, &diagnostics)
        }
        Command::Save { batch } => {
            let batch: BatchOperation = read_json(&batch)?;
            let result = service
                .execute_batch_save(&config, &batch)
                .await
                .context("Batch save failed")?;
            print_report(&service, &result)?;
            if result.success {
                Ok(())
            } else {
                Err(anyhow!("Batch save reported {} error(s)", result.errors.len()))
            }
        }
    }
}

fn read_fixture(path: &Path) -> Result<Fixture> {
    let fixture: Fixture = read_json(path)?;
    fixture
        .config
        .validate()
        .with_context(|| format!("Invalid matrix config in '{}'", path.display()))?;
    Ok(fixture)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse '{}'", path.display()))
}

fn print_report<T: Serialize>(service: &MatrixDataService, result: &T) -> Result<()> {
    service.log_service_report();
    let report = Report {
        result,
        stats: service.get_service_stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
