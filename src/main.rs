use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msme_consulting_service::{
    AppConfig, Consultant, ConsultingBackend, ServiceState, build_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(?config.listen_addr, model_id = %config.model_id, "loading model artifacts");

    let consultant = Arc::new(Consultant::initialize(config.as_ref())?);
    let lifecycle = ServiceState::new();

    let backend: Arc<dyn ConsultingBackend> = consultant.clone();
    let router = build_router(backend, lifecycle.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "consulting service ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(lifecycle.clone()))
        .await?;

    lifecycle.stop();
    consultant.release();

    Ok(())
}

async fn shutdown_signal(lifecycle: ServiceState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining");
    lifecycle.begin_drain();
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
