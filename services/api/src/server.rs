use crate::cli::ServeArgs;
use crate::infra::{admin_allowlist, narrative_generator, open_store, AppState, StoreChoice};
use crate::routes::with_assessment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use mindlab::assessment::{sync_directory, AssessmentApi, AssessmentStore};
use mindlab::config::AppConfig;
use mindlab::error::AppError;
use mindlab::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(database) = args.database.take() {
        config.store.database_path = Some(database);
    }
    if let Some(definitions) = args.definitions.take() {
        config.store.definitions_dir = definitions;
    }

    telemetry::init(&config.telemetry)?;

    match open_store(config.store.database_path.as_deref())? {
        StoreChoice::Sqlite(store) => serve(store, config).await,
        StoreChoice::Memory(store) => serve(store, config).await,
    }
}

async fn serve<S>(store: Arc<S>, config: AppConfig) -> Result<(), AppError>
where
    S: AssessmentStore + 'static,
{
    if config.store.sync_on_startup {
        let summary = sync_directory(store.as_ref(), &config.store.definitions_dir, None)?;
        if !summary.errors.is_empty() {
            warn!(errors = ?summary.errors, "some test definitions were not synced");
        }
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let api = Arc::new(AssessmentApi::new(
        store,
        narrative_generator(&config.narrative),
        admin_allowlist(&config.access),
        config.store.definitions_dir.clone(),
    ));

    let app = with_assessment_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "mindlab assessment service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
