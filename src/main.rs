use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use pod_disruptor::{api::AppState, config::Config, create_router, k8s::K8sClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let fmt_layer = if config.json_logs() {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(fmt_layer)
        .init();

    tracing::info!("Starting Pod Disruptor");

    let metrics = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus recorder installed");

    let state = AppState::new(config.clone()).with_metrics(metrics);

    // K8s connection manager
    let mgr_state = state.clone();
    tokio::spawn(async move {
        let mut client: Option<K8sClient> = None;
        tracing::info!("K8s connection manager started");

        loop {
            match &client {
                None => match K8sClient::new().await {
                    Ok(k8s) => match k8s.health_check().await {
                        Ok(_) => {
                            tracing::info!("Connected to Kubernetes cluster");
                            mgr_state.set_cluster(Arc::new(k8s.clone())).await;
                            client = Some(k8s);
                        }
                        Err(e) => tracing::warn!("K8s client created but unhealthy: {}", e),
                    },
                    Err(e) => tracing::debug!("K8s connection attempt failed: {}", e),
                },
                Some(k8s) => {
                    if let Err(e) = k8s.health_check().await {
                        tracing::error!("Lost K8s connection: {}. Reconnecting...", e);
                        mgr_state.clear_cluster().await;
                        client = None;
                    }
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
        }
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
