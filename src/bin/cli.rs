use anyhow::Result;
use clap::{Parser, Subcommand};
use filter_flow::config::Config;
use filter_flow::model::serialize::ir_registry;
use filter_flow::schema::GraphLoader;
use filter_flow::{Connection, ConnectionValidator, FilterCatalog, JsFormulaEvaluator, Mapping};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Filter catalog (JSON or YAML); overrides the config file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the filters in the catalog
    Catalog,
    /// Convert an editor graph into a serialized IR document
    Export {
        /// Path to the editor graph (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,
        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert a serialized IR document into an editor graph
    Import {
        /// Path to the IR document
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check whether a connection may be added to an editor graph
    Check {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        source: String,
        #[arg(long, default_value = "output-0")]
        source_handle: String,
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "input-0")]
        target_handle: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(path) = args.catalog {
        config.catalog_path = Some(path);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let catalog = Arc::new(config.catalog()?);
    tracing::info!("loaded {} filter definition(s)", catalog.len());

    match args.command {
        Commands::Catalog => print_catalog(&catalog),
        Commands::Export { file, output } => {
            let content = fs::read_to_string(&file)?;
            let external = GraphLoader::new().load(&content)?;

            let mut mapping = Mapping::new(catalog, Arc::new(JsFormulaEvaluator::new()));
            mapping.import_external(&external).await?;
            let document = serde_json::to_string_pretty(&mapping.export_json())?;
            write_out(output, &document)?;
        }
        Commands::Import { file, output } => {
            let content = fs::read_to_string(&file)?;
            let document: serde_json::Value = serde_json::from_str(&content)?;

            let mut mapping = Mapping::new(catalog, Arc::new(JsFormulaEvaluator::new()));
            mapping.import_json(&document, &ir_registry()).await?;
            let external = GraphLoader::new().to_json(&mapping.to_external())?;
            write_out(output, &external)?;
        }
        Commands::Check {
            file,
            source,
            source_handle,
            target,
            target_handle,
        } => {
            let content = fs::read_to_string(&file)?;
            let external = GraphLoader::new().load(&content)?;
            let validator = ConnectionValidator::new(catalog, Arc::new(JsFormulaEvaluator::new()));
            let candidate = Connection::new(source, source_handle, target, target_handle);

            if validator
                .validate(&candidate, &external.nodes, &external.edges)
                .await
            {
                println!("allowed");
            } else {
                println!("rejected");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_catalog(catalog: &FilterCatalog) {
    for def in catalog.iter() {
        let arity = if def.is_dynamic() {
            "dynamic".to_string()
        } else {
            let list = |types: Vec<filter_flow::StreamType>| {
                types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
            };
            format!("[{}] -> [{}]", list(def.static_inputs()), list(def.static_outputs()))
        };
        println!("{:<12} {:<24} {}", def.name, arity, def.description);
    }
}

fn write_out(path: Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(&path, content)?;
            println!("Wrote {:?}", path);
        }
        None => println!("{}", content),
    }
    Ok(())
}
