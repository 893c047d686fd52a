//! `hubfetch`: download a hub repository into the local cache.

// Status lines and the final error report are the program's output.
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod errors;
mod tracing;

use clap::Parser;
use hubfetch_core::Downloader;

use crate::cli::Cli;
use crate::errors::CliError;
use crate::tracing::TracingConfig;

fn main() {
    let cli = Cli::parse();

    if let Err(error) = run(&cli) {
        eprintln!("{:?}", miette::Report::new(error));
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    crate::tracing::init_tracing(TracingConfig {
        format: cli.tracing_format(),
        level: cli.level.into(),
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| CliError::Runtime { source })?;

    runtime.block_on(download(cli))
}

async fn download(cli: &Cli) -> Result<(), CliError> {
    println!(
        "Downloading model: {} (revision: {})",
        cli.repo_id, cli.revision
    );
    if let Some(path) = &cli.path {
        println!("Download location: {}", path.display());
    }

    let fail = |e| CliError::download(&cli.repo_id, &cli.revision, e);
    let downloader = Downloader::new(cli.download_config()).map_err(fail)?;
    let snapshot = downloader
        .download(&cli.repo_id, &cli.revision)
        .await
        .map_err(fail)?;

    ::tracing::info!(
        correlation_id = %crate::tracing::correlation_id(),
        commit = %snapshot.commit,
        fetched = snapshot.fetched,
        reused = snapshot.reused,
        skipped = snapshot.skipped,
        "Download complete"
    );
    println!("Downloaded to: {}", snapshot.snapshot_dir.display());
    Ok(())
}
