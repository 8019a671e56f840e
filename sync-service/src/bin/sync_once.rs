use std::sync::Arc;

use anyhow::Result;
use meter_client::LocalStore;
use sync_service::{config::AppConfig, engine::SyncEngine, observability, remote::HttpRemoteClient, upload::HttpObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let store = LocalStore::open(&cfg.store.path, cfg.store.max_connections).await?;
    let timeout = cfg.remote.timeout();
    let remote = HttpRemoteClient::new(&cfg.remote.base_url, timeout, cfg.remote.auth_bearer_token.as_deref())?;

    let mut engine = SyncEngine::new(store.clone(), Arc::new(remote), timeout);
    if let Some(url) = &cfg.remote.object_store_url {
        engine = engine.with_object_store(Arc::new(HttpObjectStore::new(url, timeout)?));
    }

    let report = engine.run_once().await?;

    match report.refreshed_meters {
        Some(count) => println!("refreshed {count} meters"),
        None => println!("refresh skipped, cache is stale"),
    }
    println!("sent {}, rejected {}, pending {}", report.sent, report.rejected.len(), report.remaining);
    for rejected in &report.rejected {
        println!(
            "  mutation {} ({}) rejected: {:?} {}",
            rejected.mutation_id, rejected.endpoint, rejected.status, rejected.message
        );
    }
    if let Some(id) = report.blocked_on {
        println!("drain paused at mutation {id}");
    }

    store.close().await;
    Ok(())
}
