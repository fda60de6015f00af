use anyhow::Result;
use position_history_sync::{
    api::{self, ApiContext},
    config::Config,
    database::HistoryStore,
    models::{FilterState, Subject},
    quota::SharedQuota,
    source::{HistorySource, HttpHistorySource},
    synchronizer::Synchronizer,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // 1. Load configuration
    let config = Config::from_env()?;
    let subject = Subject::parse(&config.subject_address, config.subject_context.clone())?;
    info!("✅ Configuration loaded.");

    // 2. Pick the history source; the local store also takes writes over the API
    let (source, store) = match &config.history_source_url {
        Some(url) => {
            info!("✅ Using remote history source at: {}", url);
            let remote: Arc<dyn HistorySource> = Arc::new(HttpHistorySource::new(url.clone())?);
            (remote, None)
        }
        None => {
            info!("✅ Using local history store at: {}", &config.db_path);
            let store = HistoryStore::new(&config.db_path)?;
            let local: Arc<dyn HistorySource> = Arc::new(store.clone());
            (local, Some(store))
        }
    };

    // 3. Mount the synchronizer for the configured subject
    let quota = SharedQuota::new(config.quota);
    let sync = Arc::new(Synchronizer::new(source, Arc::new(quota.clone()), config.sync.clone()));
    sync.mount(subject, FilterState::default()).await;
    let driver = sync.spawn_driver();

    // 4. Serve the consumer API until it exits or we are interrupted
    info!("🚀 Starting history synchronizer and API server...");
    let ctx = Arc::new(ApiContext {
        sync: Arc::clone(&sync),
        quota,
        store,
    });
    let bind_address = config.server_bind_address.clone();
    let api_handle = tokio::spawn(async move { api::run_api_server(&bind_address, ctx).await });

    let exited = tokio::select! {
        result = api_handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    driver.shutdown();

    match exited {
        Some(result) => {
            error!("[FATAL] API server has exited.");
            result??;
        }
        None => {
            info!("Shutting down.");
            sync.unmount().await;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "position_history_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
