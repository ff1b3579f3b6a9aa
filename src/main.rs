use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swgate::config::Config;
use swgate::host::{PushIngressMiddleware, Registration, TracingShell, WorkerMiddleware};
use swgate::middleware::{LoggerMiddleware, Pipeline};
use swgate::server::Server;
use swgate::storage::MemoryStorage;
use swgate::upstream::HttpUpstream;
use swgate::worker::CacheWorker;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::load().context("loading configuration")?;
    info!(
        listen = %config.listen,
        upstream = %config.upstream,
        static_cache = %config.worker.static_cache,
        api_cache = %config.worker.api_cache,
        "starting swgate"
    );

    let upstream = Arc::new(
        HttpUpstream::new(config.upstream.clone(), config.upstream_timeout())
            .context("building upstream client")?,
    );
    let registration = Arc::new(Registration::new(upstream.clone()));

    let worker = CacheWorker::new(
        config.worker.clone(),
        Arc::new(MemoryStorage::new()),
        upstream,
        Arc::new(TracingShell::new()),
    );
    // Without a reachable backend the gateway still relays, uncached.
    if let Err(e) = registration.register(worker).await {
        tracing::warn!(error = %e, "worker install failed, relaying without cache");
    }

    let pipeline = Pipeline::new()
        .layer(Arc::new(LoggerMiddleware))
        .layer(Arc::new(PushIngressMiddleware::new(
            registration.clone(),
            config.push_path.clone(),
        )))
        .layer(Arc::new(WorkerMiddleware::new(registration)))
        .build();

    let server = Server::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    server
        .run_until(move |ctx| pipeline.handle(ctx), shutdown_signal())
        .await?;

    info!("swgate stopped");
    Ok(())
}
