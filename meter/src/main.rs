use anyhow::{Context, Result};
use clap::Parser;
use meter::cli::{CliArgs, Command, run_admin_command};
use meter::config::MeterConfig;
use meter::server::MeterServer;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut cfg = MeterConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    // Override with command line arguments
    if let Some(api_addr) = args.api_addr {
        cfg.api_addr = api_addr;
    }
    if let Some(database_path) = args.database_path {
        cfg.database_path = database_path;
    }
    if let Some(log_level) = args.log_level {
        cfg.log_level = log_level;
    }
    if let Some(runtime_threads) = args.runtime_threads {
        cfg.runtime_threads = Some(runtime_threads);
    }

    if args.command == Some(Command::InitConfig) {
        cfg.save(&args.config)
            .with_context(|| format!("Failed to write config to {}", args.config))?;
        println!("Wrote configuration to {}", args.config);
        return Ok(());
    }

    let _guard = common::init_tracing(
        cfg.log_dir.as_deref(),
        &cfg.log_file,
        &cfg.log_level,
        cfg.console_port,
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = cfg.runtime_threads {
        builder.worker_threads(threads.max(1));
    }
    let runtime = builder.build().context("Failed to build tokio runtime")?;

    runtime.block_on(run(cfg, args.command.unwrap_or(Command::Serve)))
}

async fn run(cfg: MeterConfig, command: Command) -> Result<()> {
    let server = MeterServer::new(cfg)
        .await
        .context("Failed to initialize meter")?;

    if command != Command::Serve {
        let output = run_admin_command(command, server.store().as_ref(), &server.collector())
            .await?;
        println!("{}", output);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    info!("Starting meter v{}", env!("CARGO_PKG_VERSION"));
    server.run(shutdown).await?;

    info!("Shutting down meter");
    Ok(())
}
