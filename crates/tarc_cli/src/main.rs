use std::{io, process::ExitCode};

use clap::Parser;
use tarc::{
    config::{self, Config},
    reconcile::{ReconciliationReport, Reconciler},
    scanner::ScanOptions,
    source::{Catalog, TorrentDir},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod args;
mod error;
mod render;

use args::{Args, Command, ScanArgs};
use error::Error;

/// Exit code of a pass interrupted with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path).await,
        None => Config::load().await,
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(args.debug, config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    debug!("config: {config:?}");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping the pass");
                cancel.cancel();
            }
        });
    }

    let Command::Scan(scan) = args.command;

    match run(&scan, config, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Tarc(tarc::error::Error::Cancelled)) => {
            error!("the pass was cancelled, no report was produced");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    scan: &ScanArgs,
    config: Config,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    if !tokio::fs::metadata(&scan.directory)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return Err(Error::NotADirectory(scan.directory.clone()));
    }

    let mut sources: Vec<TorrentDir> =
        config.endpoints.iter().map(|e| e.source()).collect();
    sources.extend(
        scan.torrents
            .iter()
            .map(|dir| TorrentDir::new(dir.to_string_lossy(), dir)),
    );
    if sources.is_empty() {
        return Err(Error::NoEndpoints);
    }

    let catalog = Catalog::gather(&sources).await?;
    info!(
        "{} torrents from {} endpoints, {} skipped",
        catalog.len(),
        sources.len(),
        catalog.skipped().len()
    );

    let reconciler = Reconciler::new()
        .workers(scan.workers.unwrap_or_else(|| config.workers()))
        .scan_options(ScanOptions {
            skip_hidden: scan.skip_hidden || config.skip_hidden,
        });

    let report = reconciler
        .reconcile_catalog(&catalog, &scan.directory, cancel)
        .await?;

    print(&report, scan.json)
}

fn print(report: &ReconciliationReport, json: bool) -> Result<(), Error> {
    let stdout = io::stdout().lock();
    if json {
        render::json(report, stdout)
    } else {
        Ok(render::text(report, stdout)?)
    }
}

/// Logs go to stderr, stdout is for the report. With `log` on they are
/// also written to a daily file in the data directory.
fn init_logging(debug: bool, log: bool) -> Result<Option<WorkerGuard>, Error> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr = fmt::layer()
        .with_target(false)
        .with_file(false)
        .without_time()
        .compact()
        .with_writer(io::stderr);

    let (file, guard) = if log {
        let dir = config::data_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Logging(format!("could not create {dir:?}: {e}"))
        })?;
        let appender = tracing_appender::rolling::daily(dir, "tarc.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(guard)
}
