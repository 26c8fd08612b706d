//! Optional free-text narrative produced from a finished report by an external language model.
//!
//! Enrichment runs after the finish transition and never feeds back into it: a failed generation
//! leaves the session, results, and report exactly as they were.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::domain::{NarrativeRecord, SessionId, UserId};
use super::report::ResultReport;
use super::store::{AssessmentStore, StoreError};

const SYSTEM_PROMPT: &str = "You are a clinical psychologist explaining the result of a \
standardized self-assessment to a non-specialist.";

/// External text generator behind narrative enrichment.
pub trait NarrativeGenerator: Send + Sync {
    fn model(&self) -> &str;
    fn generate(&self, system: &str, prompt: &str) -> Result<String, GeneratorError>;
}

/// Generator backed by an Ollama-compatible `/api/generate` endpoint.
///
/// Blocking; call it off the async executor.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

impl NarrativeGenerator for OllamaGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, system: &str, prompt: &str) -> Result<String, GeneratorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| GeneratorError::Client(err.to_string()))?;

        let response = client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                system,
                stream: false,
            })
            .send()
            .map_err(|err| {
                if err.is_connect() {
                    GeneratorError::Connection(self.base_url.clone())
                } else if err.is_timeout() {
                    GeneratorError::Timeout(self.timeout.as_secs())
                } else {
                    GeneratorError::Client(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|err| GeneratorError::Response(err.to_string()))?;
        Ok(parsed.response)
    }
}

/// Builds the generation prompt from a stored report.
pub fn narrative_prompt(report: &ResultReport) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Test: {}", report.test.name);
    let _ = writeln!(prompt, "Category: {}", report.test.category);
    let _ = writeln!(prompt, "Total score: {}", report.scores.total);

    if !report.scores.scales.is_empty() {
        prompt.push_str("\nScale results:\n");
        for scale in &report.scores.scales {
            let _ = writeln!(
                prompt,
                "- {}: score {} ({})",
                scale.scale_name,
                scale.score,
                scale.interpretation()
            );
        }
    }

    if let Some(overall) = &report.analysis.overall {
        let _ = writeln!(
            prompt,
            "\nStandard analysis: {}: {}",
            overall.title, overall.summary
        );
    }

    prompt.push_str(
        "\nWrite a short, warm, and supportive interpretation of at most 200 words. Explain the \
         results in plain language, mention possible strengths, and offer practical suggestions \
         where they are needed. Avoid clinical jargon.",
    );
    prompt
}

/// Drives enrichment for finished sessions, one generation per session at a time.
pub struct NarrativeService<S> {
    store: Arc<S>,
    generator: Option<Arc<dyn NarrativeGenerator>>,
    in_flight: Mutex<HashSet<SessionId>>,
}

struct InFlight<'a> {
    sessions: &'a Mutex<HashSet<SessionId>>,
    session_id: SessionId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
    }
}

impl<S> NarrativeService<S>
where
    S: AssessmentStore + 'static,
{
    pub fn new(store: Arc<S>, generator: Option<Arc<dyn NarrativeGenerator>>) -> Self {
        Self {
            store,
            generator,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Generates and stores the narrative for a finished session owned by `user`.
    pub fn enrich(
        &self,
        user: &UserId,
        session_id: SessionId,
    ) -> Result<NarrativeRecord, NarrativeError> {
        let generator = self.generator.as_ref().ok_or(NarrativeError::Unavailable)?;

        let session = self
            .store
            .session(session_id)?
            .filter(|session| session.is_owned_by(user))
            .ok_or(NarrativeError::NotFound)?;
        if session.finished_at.is_none() {
            return Err(NarrativeError::NotFinished(session_id));
        }
        let report = self
            .store
            .report(session_id)?
            .ok_or(NarrativeError::NotFound)?;

        let _guard = self.claim(session_id)?;

        let prompt = narrative_prompt(&report);
        let text = match generator.generate(SYSTEM_PROMPT, &prompt) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!(
                    %session_id,
                    model = generator.model(),
                    "narrative generator returned no text"
                );
                return Err(NarrativeError::Generator(GeneratorError::Empty));
            }
            Err(err) => {
                tracing::warn!(
                    %session_id,
                    model = generator.model(),
                    error = %err,
                    "narrative generation failed"
                );
                return Err(NarrativeError::Generator(err));
            }
        };

        let narrative = NarrativeRecord {
            session_id,
            text,
            model: generator.model().to_string(),
            created_at: Utc::now(),
        };
        self.store.upsert_narrative(&narrative)?;

        tracing::info!(%session_id, model = %narrative.model, "narrative stored");
        Ok(narrative)
    }

    fn claim(&self, session_id: SessionId) -> Result<InFlight<'_>, NarrativeError> {
        let mut sessions = self.in_flight.lock().map_err(|_| {
            NarrativeError::Store(StoreError::Unavailable("narrative lock poisoned".into()))
        })?;
        if !sessions.insert(session_id) {
            return Err(NarrativeError::InProgress(session_id));
        }

        Ok(InFlight {
            sessions: &self.in_flight,
            session_id,
        })
    }
}

/// Failures of the external generator.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("cannot reach narrative generator at {0}")]
    Connection(String),
    #[error("narrative generator timed out after {0}s")]
    Timeout(u64),
    #[error("narrative generator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable generator response: {0}")]
    Response(String),
    #[error("narrative generator returned an empty response")]
    Empty,
    #[error("http client error: {0}")]
    Client(String),
}

/// Error raised by narrative enrichment.
#[derive(Debug, thiserror::Error)]
pub enum NarrativeError {
    #[error("narrative generation is not configured")]
    Unavailable,
    #[error("session not found")]
    NotFound,
    #[error("session {0} is not finished")]
    NotFinished(SessionId),
    #[error("a narrative for session {0} is already being generated")]
    InProgress(SessionId),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
