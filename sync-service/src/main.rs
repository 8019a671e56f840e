use std::sync::Arc;

use anyhow::Result;
use meter_client::LocalStore;
use sync_service::{
    config::AppConfig,
    connectivity::{watch_reachability, Connectivity},
    engine::{SyncEngine, SyncEvent},
    metrics_server, observability,
    remote::HttpRemoteClient,
    upload::HttpObjectStore,
    worker::SyncWorker,
};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = LocalStore::open(&cfg.store.path, cfg.store.max_connections).await?;
    let timeout = cfg.remote.timeout();
    let remote = HttpRemoteClient::new(&cfg.remote.base_url, timeout, cfg.remote.auth_bearer_token.as_deref())?;

    let mut engine = SyncEngine::new(store.clone(), Arc::new(remote.clone()), timeout);
    match &cfg.remote.object_store_url {
        Some(url) => engine = engine.with_object_store(Arc::new(HttpObjectStore::new(url, timeout)?)),
        None => tracing::warn!("no object store configured, queued uploads will be rejected"),
    }
    let engine = Arc::new(engine);
    let pending = engine.queue().report_depth().await?;
    tracing::info!(pending, "local store ready");
    let mut events = engine.subscribe();

    let connectivity = Connectivity::new(remote.probe().await);
    let (worker, handle) = SyncWorker::new(engine, connectivity.clone(), cfg.sync.schedule());

    let probe = tokio::spawn(watch_reachability(
        connectivity,
        cfg.sync.probe_interval(),
        handle.cancellation(),
        move || {
            let remote = remote.clone();
            async move { remote.probe().await }
        },
    ));
    let worker = tokio::spawn(worker.run());

    // Rejections need user action; make them loud.
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::MutationRejected(rejected)) => tracing::error!(
                    mutation_id = rejected.mutation_id,
                    endpoint = %rejected.endpoint,
                    status = ?rejected.status,
                    message = %rejected.message,
                    "queued write rejected by remote"
                ),
                Ok(SyncEvent::RefreshRejected { status, message }) => {
                    tracing::error!(status, message = %message, "refresh rejected by remote")
                }
                Ok(SyncEvent::RunCompleted(_)) => {}
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "sync events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    handle.trigger();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    handle.shutdown();

    tokio::try_join!(worker, probe, reporter)?;
    store.close().await;

    Ok(())
}
