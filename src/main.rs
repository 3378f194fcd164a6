use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use piazza::config::{Cli, Config};
use piazza::notify::NotificationService;
use piazza::persist;
use piazza::reward::{RewardEngine, RewardPolicy};
use piazza::server::{Dispatcher, Server};
use piazza::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Load the last snapshot, if any
    let store = match persist::load(config.state_path())? {
        Some(state) => {
            tracing::info!(
                users = state.users.len(),
                posts = state.posts.len(),
                "snapshot loaded"
            );
            Arc::new(Store::restore(state, config.auth.hash_cost))
        }
        None => Arc::new(Store::new(config.auth.hash_cost)),
    };

    let notifications = Arc::new(NotificationService::new(
        Arc::clone(&store),
        config.beacon_addr()?,
    ));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), Arc::clone(&notifications)));

    // One stop signal for the acceptor, the reactors, and both periodic
    // engines.
    let (stop_tx, stop_rx) = watch::channel(false);

    let engine = RewardEngine::new(
        Arc::clone(&store),
        Arc::clone(&notifications),
        RewardPolicy {
            period: config.reward_period(),
            author_share: config.reward.author_share,
        },
    );
    let reward_task = tokio::spawn(engine.run(stop_rx.clone()));

    let snapshot_task = tokio::spawn(persist::run_snapshot_writer(
        Arc::clone(&store),
        config.state_path().clone(),
        config.snapshot_period(),
        stop_rx.clone(),
    ));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let server = Server::bind(addr, dispatcher, config.server.reactors).await?;
    tracing::info!("Listening on {}", server.local_addr()?);

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "failed to install ctrl-c handler");
        }
        tracing::info!("shutdown requested");
        let _ = stop_tx.send(true);
    });

    server.run(stop_rx).await?;

    // The snapshot writer takes a final snapshot on its way out; give both
    // background tasks a moment to observe the stop signal.
    let _ = tokio::time::timeout(Duration::from_secs(5), reward_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), snapshot_task).await;

    Ok(())
}
