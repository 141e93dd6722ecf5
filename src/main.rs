use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use clipforge::config::Config;
use clipforge::core::collab::{HttpDownloader, LocalObjectStore, NoopMetrics};
use clipforge::core::compiler::FilterGraphCompiler;
use clipforge::core::engine::{DeliveryTransmuxer, EngineRunner, MediaProber};
use clipforge::core::planner::WorkflowPlanner;
use clipforge::core::progress_stream::ProgressStream;
use clipforge::core::store::{JobStore, PostgresStore};
use clipforge::core::worker::{Worker, WorkerConfig, WorkerPool};
use clipforge::http::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;
    let store: Arc<dyn JobStore> = Arc::new(store);

    tokio::fs::create_dir_all(&config.work_dir).await?;
    let object_root = config.work_dir.join("objects");
    let object_store = Arc::new(LocalObjectStore::new(object_root));
    let downloader = Arc::new(
        HttpDownloader::new(
            object_store.clone(),
            store.clone(),
            config.primary_bucket.clone(),
            config.presign_ttl.as_secs(),
        )
        .with_host_rewrite(config.rewrite_download_host.clone()),
    );
    let metrics = Arc::new(NoopMetrics);

    let prober = Arc::new(MediaProber::new(config.ffprobe_path.clone()));
    let runner = Arc::new(EngineRunner::new(config.chunk_size));
    let compiler = Arc::new(FilterGraphCompiler::new(config.work_dir.join("scratch")));
    let transmuxer = Arc::new(DeliveryTransmuxer::new(
        config.ffmpeg_path.clone(),
        config.work_dir.join("transmux"),
    ));

    let mut workers = Vec::with_capacity(config.worker_pool_size);
    for id in 0..config.worker_pool_size {
        let worker_config = WorkerConfig {
            id,
            max_retries: config.max_retries,
            poll_interval: config.poll_interval,
            primary_bucket: config.primary_bucket.clone(),
            presign_ttl: config.presign_ttl,
        };
        workers.push(Arc::new(Worker::new(
            worker_config,
            config.ffmpeg_path.clone(),
            store.clone(),
            compiler.clone(),
            prober.clone(),
            runner.clone(),
            transmuxer.clone(),
            object_store.clone(),
            downloader.clone(),
            metrics.clone(),
        )));
    }
    let worker_pool = Arc::new(WorkerPool::new(workers));
    worker_pool.start();

    let planner = Arc::new(WorkflowPlanner::new(store.clone()));
    let progress = Arc::new(ProgressStream::new(store.clone()));

    let app_state = AppState { store, pool: worker_pool.clone(), planner, progress };
    let app = http::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    worker_pool.stop().await;
    Ok(())
}
