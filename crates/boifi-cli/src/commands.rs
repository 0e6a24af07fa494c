use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use boifi_api::build_app;
use boifi_discovery::{DiscoveryPipeline, HttpKvPublisher, Scheduler};
use boifi_distributor::Distributor;
use boifi_recommender::{ExecutorClient, ResponseAnalyzer, ScoringBaseline, SessionManager, Worker};
use boifi_store::{InMemoryPolicyStore, PolicyStore, PostgresPolicyStore};
use uuid::Uuid;

use crate::cli::StoreArg;
use crate::output;

pub async fn serve(
    bind: String,
    store: StoreArg,
    database_url: Option<String>,
    auth_token: String,
    subscriber_queue_capacity: usize,
    max_consecutive_drops: u32,
) -> Result<()> {
    let store: Arc<dyn PolicyStore> = match store {
        StoreArg::Memory => Arc::new(InMemoryPolicyStore::new()),
        StoreArg::Postgres => {
            let url = database_url.context("--database-url is required for --store postgres")?;
            Arc::new(PostgresPolicyStore::connect(&url).await.context("connecting to postgres policy store")?)
        }
    };

    let distributor = Arc::new(Distributor::new(subscriber_queue_capacity, max_consecutive_drops));

    let changes = store.watch().await.context("subscribing to policy store change stream")?;
    let driver_distributor = distributor.clone();
    tokio::spawn(async move {
        if let Err(e) = driver_distributor.run(changes).await {
            tracing::error!(error = %e, "distributor stopped");
        }
    });

    let app = build_app(store, distributor, Arc::new(auth_token));

    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
    println!("boifi control plane listening on {bind}");
    axum::serve(listener, app).await.context("serving control-plane API")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn discovery(
    trace_dependencies_url: String,
    kv_base_url: String,
    auth_token: String,
    service_base_url_template: Option<String>,
    service_map_key: String,
    notify_channel: String,
    interval_secs: u64,
    lookback_secs: u64,
    once: bool,
) -> Result<()> {
    let kube_client = kube::Client::try_default().await.context("connecting to Kubernetes, check your kubeconfig")?;
    let publisher: Arc<dyn boifi_discovery::KvPublisher> = Arc::new(HttpKvPublisher::new(kv_base_url, auth_token));
    let pipeline = Arc::new(DiscoveryPipeline::new(
        kube_client,
        trace_dependencies_url,
        service_base_url_template,
        publisher,
        service_map_key,
        notify_channel,
        interval_secs,
        lookback_secs,
    ));

    if once {
        pipeline.run_tick().await.context("running discovery tick")?;
        println!("discovery tick complete");
        return Ok(());
    }

    let scheduler = Scheduler::new(pipeline, Duration::from_secs(interval_secs));
    scheduler.run().await;
    Ok(())
}

pub async fn session_create(service: String, search_space: PathBuf, max_trials: u32, time_budget_secs: u64, storage_dir: PathBuf) -> Result<()> {
    let manager = SessionManager::new(storage_dir);
    manager.recover().await.context("recovering existing sessions")?;

    let bytes = tokio::fs::read(&search_space).await.with_context(|| format!("reading {}", search_space.display()))?;
    let space = serde_json::from_slice(&bytes).context("parsing search space JSON")?;

    let id = manager.create(service, space, max_trials, time_budget_secs).await?;
    println!("created session {id}");
    Ok(())
}

pub async fn session_list(storage_dir: PathBuf) -> Result<()> {
    let manager = SessionManager::new(storage_dir);
    manager.recover().await.context("recovering existing sessions")?;
    let sessions = manager.list().await;
    print!("{}", output::render_sessions_table(&sessions));
    Ok(())
}

pub async fn session_status(id: Uuid, storage_dir: PathBuf) -> Result<()> {
    let manager = SessionManager::new(storage_dir);
    manager.recover().await.context("recovering existing sessions")?;
    let session = manager.get(id).await.context("session not found")?;
    print!("{}", output::render_session_detail(&session));
    Ok(())
}

pub async fn session_stop(id: Uuid, storage_dir: PathBuf) -> Result<()> {
    let manager = SessionManager::new(storage_dir);
    manager.recover().await.context("recovering existing sessions")?;
    manager.stop(id).await?;
    println!("session {id} will stop after its current trial");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn session_run(
    id: Uuid,
    storage_dir: PathBuf,
    control_plane_base: String,
    observation_base: String,
    auth_token: String,
    fault_duration_secs: u64,
    settle_buffer_secs: u64,
    n_initial_cold_start: usize,
    seed: u64,
) -> Result<()> {
    let manager = Arc::new(SessionManager::new(storage_dir));
    manager.recover().await.context("recovering existing sessions")?;
    manager.get(id).await.context("session not found")?;

    let executor = Arc::new(ExecutorClient::new(control_plane_base, observation_base, auth_token).context("building executor client")?);
    let analyzer = ResponseAnalyzer::default();
    let worker = Worker::new(
        manager,
        executor,
        analyzer,
        Duration::from_secs(fault_duration_secs),
        Duration::from_secs(settle_buffer_secs),
        n_initial_cold_start,
    );

    worker.run(id, ScoringBaseline::default(), seed).await.context("running optimization session")?;
    println!("session {id} finished");
    Ok(())
}
