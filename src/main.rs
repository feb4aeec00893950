use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tradeledger::datasource::HttpTradeSource;
use tradeledger::recalc::RecalcSettings;
use tradeledger::{api, config::Config, db::init_db, AccountId, Ingestor, Orchestrator, Repository, TradeSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;

    let repo = Arc::new(Repository::new(pool));
    let orchestrator = Orchestrator::new(repo, RecalcSettings::from(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = match (&config.trade_source_url, config.sync_accounts.is_empty()) {
        (Some(url), false) => {
            let source: Arc<dyn TradeSource> = Arc::new(HttpTradeSource::new(url.clone()));
            let ingestor = Ingestor::new(source, orchestrator.clone(), config.lookback_ms);
            let accounts: Vec<AccountId> =
                config.sync_accounts.iter().map(AccountId::new).collect();
            let interval = Duration::from_millis(config.sync_interval_ms);
            Some(tokio::spawn(async move {
                ingestor.run(accounts, interval, shutdown_rx).await
            }))
        }
        (Some(_), true) => {
            tracing::warn!("TRADE_SOURCE_URL set but SYNC_ACCOUNTS is empty, sync disabled");
            None
        }
        _ => None,
    };

    let app = api::create_router(api::AppState::new(Arc::new(orchestrator)));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        task.await.context("sync loop panicked")?;
    }

    Ok(())
}
