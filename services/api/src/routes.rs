use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use mindlab::assessment::{assessment_router, AssessmentApi, AssessmentStore};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_assessment_routes<S>(api: Arc<AssessmentApi<S>>) -> axum::Router
where
    S: AssessmentStore + 'static,
{
    assessment_router(api)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use mindlab::assessment::{AdminAllowlist, MemoryStore, TestDefinition};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn app_state() -> AppState {
        let recorder = PrometheusBuilder::new().build_recorder();
        AppState {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(recorder.handle()),
        }
    }

    fn app(state: AppState) -> axum::Router {
        let store = Arc::new(MemoryStore::default());
        let definition = TestDefinition::from_json(
            r#"{
                "slug": "one-item",
                "name": "One item",
                "questions": [
                    { "order": 1, "text": "Only", "options": [{ "text": "Yes", "score": 1 }] }
                ]
            }"#,
        )
        .expect("definition parses");
        store
            .replace_test_content(&definition)
            .expect("definition stores");

        let api = Arc::new(AssessmentApi::new(
            store,
            None,
            AdminAllowlist::default(),
            std::env::temp_dir(),
        ));
        with_assessment_routes(api).layer(Extension(state))
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).expect("request builds"))
            .await
            .expect("router responds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (status, body) = get(app(app_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let state = app_state();
        let (status, body) = get(app(state.clone()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("initializing"));

        state.readiness.store(true, Ordering::Release);
        let (status, body) = get(app(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ready"));
    }

    #[tokio::test]
    async fn metrics_render_as_text() {
        let (status, _) = get(app(app_state()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn assessment_routes_are_mounted() {
        let (status, body) = get(app(app_state()), "/api/v1/tests").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("One item"));
    }
}
