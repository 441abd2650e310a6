use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{error, info};

use runner::core::languages::init_languages;
use runner::core::{EngineConfig, EngineResponse};
use runner::engine::Dispatcher;
use runner::jobs::{process_run_request, HistorySink, NoHistory, RedisHistory, RunResponse};
use runner::redis_manager::{RedisManager, ResultStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("runner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env()?;
    let registry = init_languages()?;
    info!(
        "Loaded {} language profiles: {}",
        registry.len(),
        registry.languages().join(", ")
    );

    let dispatcher = Arc::new(Dispatcher::new(registry, &config));
    info!(
        "Engine config: deadline={}ms, probe_timeout={}ms, output_root={}, isolation={}, stderr_policy={:?}",
        config.deadline_ms,
        config.probe_timeout_ms,
        config.output_root.display(),
        dispatcher.isolation(),
        config.stderr_policy
    );

    info!("Starting Runner Worker...");

    let mut redis = RedisManager::from_env().await?;
    let results = redis.result_store().await?;

    let history: Arc<dyn HistorySink> = match std::env::var("RUNNER_HISTORY").as_deref() {
        Ok("off") => {
            info!("Run history disabled");
            Arc::new(NoHistory)
        }
        _ => Arc::new(RedisHistory::new(results.connection())),
    };

    let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    info!(
        "Waiting for jobs (max {} concurrent)...",
        config.max_concurrent_jobs
    );

    loop {
        let permit = permits.clone().acquire_owned().await?;
        let request = redis.pop_job().await?;

        let dispatcher = dispatcher.clone();
        let history = history.clone();
        let results = results.clone();

        tokio::spawn(async move {
            let request_id = request.request_id.clone();

            // A panic inside the engine still produces a stored result
            let handle = tokio::spawn(async move {
                process_run_request(&dispatcher, history.as_ref(), request).await
            });
            let response = match handle.await {
                Ok(response) => response,
                Err(e) => {
                    error!("Run job {} aborted: {}", request_id, e);
                    RunResponse {
                        request_id: request_id.clone(),
                        response: EngineResponse::internal("Internal execution error"),
                    }
                }
            };

            if let Err(e) = store(&results, &response).await {
                error!("Failed to store result for {}: {:#}", request_id, e);
            }
            drop(permit);
        });
    }
}

async fn store(results: &ResultStore, response: &RunResponse) -> Result<()> {
    results.store_result(response).await?;
    info!(
        "Run job completed: request_id={}, category={}",
        response.request_id,
        response.response.category()
    );
    Ok(())
}
