// CLI argument definitions
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct SharedOptions {
    /// DuckDB to connect to - uses an inmemory-db if not configured.
    #[arg(short = 'd', long = "db-url")]
    pub db_url: Option<String>,
    /// Number of threads to configure DuckDB with
    #[arg(short = 'j', long = "threads", default_value = "1")]
    pub threads: u8,
    /// GB of RAM to grant DuckDB
    #[arg(short = 'm', long = "memory-gbs", default_value = "1")]
    pub memory_gb: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest publication XML files
    Ingest {
        #[command(flatten)]
        shared_options: SharedOptions,
        /// Number of documents to ingest concurrently
        #[arg(short = 'w', long = "workers", default_value = "4")]
        workers: usize,
        /// Keep the body of every rejected document in this directory
        #[arg(long = "error-dir")]
        error_dir: Option<PathBuf>,
        /// Publication documents to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print row counts per table as json
    Stats {
        #[command(flatten)]
        shared_options: SharedOptions,
    },
}

#[derive(Parser)]
#[command(name = "reistijden")]
#[command(about = "Ingest road travel-time publications and deduplicate measurement sites")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Reistijden {
    #[command(subcommand)]
    pub command: Commands,
}
