use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState};
use crate::routes::with_distribution_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

use leadflow::config::AppConfig;
use leadflow::distribution::{DistributionRouterState, NoActiveRuleStore};
use leadflow::error::AppError;
use leadflow::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = build_engine(&config.distribution, Arc::new(NoActiveRuleStore));
    let router_state = DistributionRouterState {
        service: engine.service,
        pipeline: engine.pipeline,
        jobs: engine.jobs,
        spool_dir: config.distribution.bulk_spool_dir.clone(),
    };

    let app = with_distribution_routes(router_state)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lead distribution engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
