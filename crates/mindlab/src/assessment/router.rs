use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::access::{AdminAllowlist, CallerIdentity};
use super::catalog::sync_directory;
use super::domain::{OptionId, QuestionId, SessionId, TestId};
use super::enrichment::{NarrativeError, NarrativeGenerator, NarrativeService};
use super::service::{SessionService, SessionServiceError};
use super::store::AssessmentStore;

/// Everything the assessment endpoints share.
pub struct AssessmentApi<S> {
    pub sessions: SessionService<S>,
    pub narratives: NarrativeService<S>,
    pub admins: AdminAllowlist,
    pub definitions_dir: PathBuf,
}

impl<S> AssessmentApi<S>
where
    S: AssessmentStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        generator: Option<Arc<dyn NarrativeGenerator>>,
        admins: AdminAllowlist,
        definitions_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions: SessionService::new(Arc::clone(&store)),
            narratives: NarrativeService::new(store, generator),
            admins,
            definitions_dir: definitions_dir.into(),
        }
    }
}

/// Router builder exposing the test catalog, session lifecycle, history, and admin sync.
pub fn assessment_router<S>(api: Arc<AssessmentApi<S>>) -> Router
where
    S: AssessmentStore + 'static,
{
    Router::new()
        .route("/api/v1/tests", get(list_tests_handler::<S>))
        .route("/api/v1/tests/:test_id", get(test_detail_handler::<S>))
        .route("/api/v1/sessions/start", post(start_handler::<S>))
        .route("/api/v1/sessions/answer", post(answer_handler::<S>))
        .route("/api/v1/sessions/finish", post(finish_handler::<S>))
        .route(
            "/api/v1/sessions/:session_id/narrative",
            post(narrative_handler::<S>),
        )
        .route("/api/v1/me/sessions", get(history_handler::<S>))
        .route(
            "/api/v1/me/sessions/:session_id",
            get(session_detail_handler::<S>),
        )
        .route("/api/v1/admin/sync", post(sync_handler::<S>))
        .with_state(api)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartRequest {
    #[serde(default)]
    pub test_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnswerRequest {
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub question_id: i64,
    #[serde(default)]
    pub option_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FinishRequest {
    #[serde(default)]
    pub session_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SyncQuery {
    pub slug: Option<String>,
}

fn required(field: &str, value: i64) -> Result<i64, ApiError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ApiError::InvalidInput(format!("{field} is required")))
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))
}

/// Runs store-bound work on the blocking pool so SQLite I/O never stalls the executor.
async fn run_blocking<S, T, F>(api: Arc<AssessmentApi<S>>, work: F) -> Result<T, ApiError>
where
    S: AssessmentStore + 'static,
    T: Send + 'static,
    F: FnOnce(&AssessmentApi<S>) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&api))
        .await
        .unwrap_or_else(|join_error| {
            tracing::error!(error = %join_error, "blocking store task aborted");
            Err(ApiError::Internal)
        })
}

pub(crate) async fn list_tests_handler<S>(State(api): State<Arc<AssessmentApi<S>>>) -> Response
where
    S: AssessmentStore + 'static,
{
    match run_blocking(api, |api| Ok(api.sessions.list_tests()?)).await {
        Ok(tests) => (StatusCode::OK, Json(json!({ "tests": tests }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn test_detail_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    Path(test_id): Path<i64>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let test_id = TestId(test_id);
    match run_blocking(api, move |api| Ok(api.sessions.test_detail(test_id)?)).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn start_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let test_id = match json_body(body).and_then(|request| required("testId", request.test_id)) {
        Ok(test_id) => TestId(test_id),
        Err(err) => return err.into_response(),
    };

    match run_blocking(api, move |api| Ok(api.sessions.start(&user, test_id)?)).await {
        Ok(start) => {
            let status = if start.resumed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(start)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn answer_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let request = match json_body(body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let ids = required("sessionId", request.session_id).and_then(|session_id| {
        Ok((
            SessionId(session_id),
            QuestionId(required("questionId", request.question_id)?),
            OptionId(required("optionId", request.option_id)?),
        ))
    });
    let (session_id, question_id, option_id) = match ids {
        Ok(ids) => ids,
        Err(err) => return err.into_response(),
    };

    let outcome = run_blocking(api, move |api| {
        Ok(api
            .sessions
            .record_answer(&user, session_id, question_id, option_id)?)
    })
    .await;
    match outcome {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn finish_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    body: Result<Json<FinishRequest>, JsonRejection>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let session_id =
        match json_body(body).and_then(|request| required("sessionId", request.session_id)) {
            Ok(session_id) => SessionId(session_id),
            Err(err) => return err.into_response(),
        };

    match run_blocking(api, move |api| Ok(api.sessions.finish(&user, session_id)?)).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn narrative_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    Path(session_id): Path<i64>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let session_id = SessionId(session_id);
    match run_blocking(api, move |api| Ok(api.narratives.enrich(&user, session_id)?)).await {
        Ok(narrative) => (StatusCode::OK, Json(narrative)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn history_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
) -> Response
where
    S: AssessmentStore + 'static,
{
    match run_blocking(api, move |api| Ok(api.sessions.history(&user)?)).await {
        Ok(sessions) => (StatusCode::OK, Json(json!({ "sessions": sessions }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn session_detail_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    Path(session_id): Path<i64>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    let session_id = SessionId(session_id);
    match run_blocking(api, move |api| Ok(api.sessions.detail(&user, session_id)?)).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn sync_handler<S>(
    State(api): State<Arc<AssessmentApi<S>>>,
    CallerIdentity(user): CallerIdentity,
    Query(query): Query<SyncQuery>,
) -> Response
where
    S: AssessmentStore + 'static,
{
    if !api.admins.is_admin(&user) {
        tracing::warn!(user = %user, "admin sync refused");
        return ApiError::Forbidden.into_response();
    }

    let slug = query.slug.filter(|slug| !slug.trim().is_empty());
    let requested = slug.clone();
    let outcome = run_blocking(api, move |api| {
        let store = api.sessions.store().as_ref();
        sync_directory(store, &api.definitions_dir, slug.as_deref()).map_err(|err| {
            tracing::error!(error = %err, "cannot load test definitions");
            ApiError::Internal
        })
    })
    .await;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) => return err.into_response(),
    };
    // An unparseable file may be the requested one, so report it instead of a 404.
    if let (Some(slug), 0, true) = (
        requested.as_deref(),
        summary.tests_selected,
        summary.errors.is_empty(),
    ) {
        return ApiError::NotFound(format!("no definition with slug '{slug}'")).into_response();
    }

    (StatusCode::OK, Json(summary)).into_response()
}

/// Client-facing error taxonomy of the assessment API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidState(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({
            "error": self.to_string(),
        });
        (self.status(), Json(payload)).into_response()
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(err: SessionServiceError) -> Self {
        match err {
            SessionServiceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SessionServiceError::InvalidInput(message) => ApiError::InvalidInput(message),
            SessionServiceError::AlreadyFinished(_) => ApiError::InvalidState(err.to_string()),
            SessionServiceError::Store(source) => {
                tracing::error!(error = %source, "session store failure");
                ApiError::Internal
            }
        }
    }
}

impl From<NarrativeError> for ApiError {
    fn from(err: NarrativeError) -> Self {
        match err {
            NarrativeError::Unavailable => ApiError::Unavailable(err.to_string()),
            NarrativeError::NotFound => ApiError::NotFound(err.to_string()),
            NarrativeError::NotFinished(_) | NarrativeError::InProgress(_) => {
                ApiError::InvalidState(err.to_string())
            }
            NarrativeError::Generator(_) => {
                ApiError::Unavailable("narrative generation failed".to_string())
            }
            NarrativeError::Store(source) => {
                tracing::error!(error = %source, "narrative store failure");
                ApiError::Internal
            }
        }
    }
}
