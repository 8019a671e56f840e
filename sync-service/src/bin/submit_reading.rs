use std::{env, sync::Arc};

use anyhow::{bail, Context, Result};
use meter_client::{domain::ReadingDraft, LocalStore};
use sync_service::{
    config::AppConfig,
    connectivity::Connectivity,
    engine::SyncEngine,
    observability,
    remote::HttpRemoteClient,
    repository::{Repository, SubmitOutcome},
    worker::SyncWorker,
};
use time::{macros::format_description, Date};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        bail!("usage: submit_reading <meter_id> <value> <YYYY-MM-DD> <read_by>");
    }
    let value: f64 = args[2].parse().with_context(|| format!("invalid value {}", args[2]))?;
    let date = Date::parse(&args[3], format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date {}", args[3]))?;
    let draft = ReadingDraft {
        meter_id: args[1].clone(),
        value,
        date,
        read_by: args[4].clone(),
    };

    let cfg = AppConfig::load()?;
    let store = LocalStore::open(&cfg.store.path, cfg.store.max_connections).await?;
    let timeout = cfg.remote.timeout();
    let remote = Arc::new(HttpRemoteClient::new(
        &cfg.remote.base_url,
        timeout,
        cfg.remote.auth_bearer_token.as_deref(),
    )?);

    let connectivity = Connectivity::new(remote.probe().await);
    let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), timeout));
    // No background worker in a one-shot run; the engine is driven below.
    let (_worker, handle) = SyncWorker::new(engine.clone(), connectivity.clone(), cfg.sync.schedule());
    let repository = Repository::new(store.clone(), remote, handle, connectivity.clone(), timeout);

    let outcome = repository.submit_reading(draft).await?;
    match &outcome {
        SubmitOutcome::Submitted { reading_id } => println!("submitted {reading_id}"),
        SubmitOutcome::Queued {
            reading_id,
            mutation_id,
        } => println!("queued {reading_id} as mutation {mutation_id}"),
        SubmitOutcome::Rejected {
            reading_id,
            status,
            message,
        } => println!("rejected {reading_id}: {status} {message}"),
    }

    if connectivity.is_online() && !matches!(outcome, SubmitOutcome::Rejected { .. }) {
        let report = engine.run_once().await?;
        println!("pending after sync: {}", report.remaining);
    }

    store.close().await;
    Ok(())
}
