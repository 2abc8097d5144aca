use crate::cli::{Commands, Reistijden, SharedOptions};
use clap::Parser;
use reistijden::{Store, batch};
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

fn open_store(options: &SharedOptions) -> anyhow::Result<Store> {
    Store::open(options.db_url.as_deref(), options.threads, options.memory_gb)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE),
        )
        .with(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Reistijden::try_parse()?;
    match args.command {
        Commands::Ingest {
            shared_options,
            workers,
            error_dir,
            files,
        } => {
            let store = open_store(&shared_options)?;
            let summary = batch::ingest_files(&store, files, workers, error_dir).await?;
            if summary.rejected > 0 {
                anyhow::bail!(
                    "{} of {} documents rejected",
                    summary.rejected,
                    summary.rejected + summary.accepted
                );
            }
        }
        Commands::Stats { shared_options } => {
            let store = open_store(&shared_options)?;
            println!("{}", serde_json::to_string_pretty(&store.counts()?)?);
        }
    }

    info!("Terminating");
    Ok(())
}
