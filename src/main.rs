use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Result, WrapErr, bail};
use slog::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// lib.rs imports
use deposit_tracker::{
    chains,
    config::{self, *},
    deposit_db::{self, DepositDb, DepositStore},
    error::StartupError,
    logger::Logger,
    rpc::Client,
    telegram::TelegramNotifier,
    tracker::DepositTracker,
};

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Non UTF-8 path: {:?}", path))?;
    Ok(shellexpand::full(path)?.to_string().into())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args with clap
    let args = Cli::parse();

    // Load config file & shellexpand paths so we can use "~/...", etc
    let config_path = args.config_path.as_deref().map(expand_path).transpose()?;
    let mut config = config::merge_args_from_file::<CliArgs>(args.config, config_path)?;
    config.datadir = expand_path(&config.datadir)?;

    let log_file = match config.log_file.as_os_str().is_empty() {
        true => None,
        false => Some(expand_path(&config.log_file)?),
    };
    let logger = Logger::new(config.log_level, log_file.as_deref())?;
    logger.bridge_log_crate()?;

    match args.command.unwrap_or(CliCmd::Run {}) {
        CliCmd::Run {} => {
            let log = logger.component("main");
            if let Err(e) = run(&config, &logger).await {
                error!(log, "Deposit tracker failed to start"; "error" => %e);
                return Err(e).wrap_err("Startup failed");
            }
        }
        CliCmd::List {} => {
            let db = open_db(&config, &logger).await?;
            deposit_db::print(db.get_all().await?);
        }
        CliCmd::Show { hash } => {
            let key = deposit_db::record_key(&hash)
                .ok_or_else(|| eyre::eyre!("Invalid transaction hash {}", hash.red()))?;
            let db = open_db(&config, &logger).await?;
            match db.get(&key).await? {
                Some(record) => deposit_db::print_entry(&record, None),
                None => bail!("Deposit {} not in the DB", hash.red()),
            }
        }
        CliCmd::Version {} => {
            let mut ver = Cli::command().render_version();
            ver.pop(); // remove "\n"
            println!("version: {}", ver);
        }
    }
    Ok(())
}

async fn open_db(config: &CliArgs, logger: &Logger) -> Result<DepositDb> {
    let db = DepositDb::new(
        config.datadir.join(&config.deposit_db),
        &logger.component("deposit_db"),
    );
    db.connect().await?;
    Ok(db)
}

async fn run(config: &CliArgs, logger: &Logger) -> Result<(), StartupError> {
    let settings = Settings::from_args(config)?;
    let log = logger.component("main");

    let client = Arc::new(Client::new(
        &settings.rpc_url,
        settings.poll_interval,
        &logger.component("rpc"),
    )?);
    client.connect().await?;
    chains::check_deposit_contract(client.chain_id(), &settings.deposit_contract, &log);

    let store = Arc::new(DepositDb::new(
        settings.deposit_db.clone(),
        &logger.component("deposit_db"),
    ));
    let notifier = Arc::new(TelegramNotifier::new(&settings.telegram)?);

    let tracker = DepositTracker::new(
        client,
        store,
        notifier,
        settings.deposit_contract,
        settings.fee_decimals,
        &logger.component("tracker"),
    );
    tracker.start_tracking().await?;

    shutdown_signal().await;
    info!(log, "Received shutdown signal. Graceful shutdown start");
    tracker.stop_tracking().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
