// Account Vending - Server
// HTTP registration endpoint + change feed poller + guardrail monitor in one process

use account_vending::{api, app, Config, Services};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "account-vending-server")]
#[command(about = "Account vending server - registration API and background workers", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, env = "ACCOUNT_VENDING_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "ACCOUNT_VENDING_LOG_JSON")]
    json: bool,

    /// Skip the periodic guardrail monitor
    #[arg(long)]
    no_monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    app::init_tracing(&cli.log_level, cli.json);

    let config = Config::from_env().context("invalid configuration")?;
    let listen_addr = config.listen_addr;
    let services = Services::local(config).context("failed to open database")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background workers
    let feed = services.feed.clone();
    let poll_interval = services.config.feed.poll_interval;
    let feed_rx = shutdown_rx.clone();
    let feed_task = tokio::spawn(async move { feed.run(poll_interval, feed_rx).await });

    let monitor_task = if cli.no_monitor {
        info!("guardrail monitor disabled");
        None
    } else {
        let monitor = services.monitor.clone();
        let interval = monitor.interval();
        let monitor_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { monitor.run(interval, monitor_rx).await }))
    };

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;

    info!(%listen_addr, version = account_vending::VERSION, "🚀 server running");

    let mut server_rx = shutdown_rx;
    axum::serve(listener, api::router(services))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = server_rx.changed() => {}
            }
        })
        .await
        .context("server error")?;

    info!("shutting down background workers");
    shutdown_tx.send(true).ok();
    feed_task.await.ok();
    if let Some(task) = monitor_task {
        task.await.ok();
    }

    Ok(())
}
