//! Self-assessment sessions: scoring, interpretation, risk flagging, and report assembly.
//!
//! Content (tests, scales, questions, cutoffs, templates, risk rules) is written by the catalog
//! sync and read by the session lifecycle. A session is answered while active, finished exactly
//! once, and its report is immutable afterwards.

pub mod access;
pub mod catalog;
pub mod domain;
pub mod enrichment;
pub mod memory;
pub mod report;
pub mod router;
pub mod scoring;
pub mod service;
pub mod sqlite;
pub mod store;

#[cfg(test)]
mod tests;

pub use access::{AdminAllowlist, CallerIdentity, USER_ID_HEADER};
pub use catalog::{
    load_definitions, sync_definitions, sync_directory, CatalogError, LoadedDefinitions,
    SyncSummary, TestDefinition,
};
pub use domain::{
    AnalysisMode, AnalysisTemplate, AnswerDetail, AnswerOption, Cutoff, NarrativeRecord, OptionId,
    Question, QuestionId, RecordedAnswer, ResultRecord, RiskRule, RiskSeverity, ScaleDefinition,
    ScaleId, Session, SessionId, SessionStatus, SessionSummary, TestId, TestRecord, UserId,
};
pub use enrichment::{
    GeneratorError, NarrativeError, NarrativeGenerator, NarrativeService, OllamaGenerator,
};
pub use memory::MemoryStore;
pub use report::{assemble_report, ReportInputs, ResultReport, DEFAULT_DISCLAIMER};
pub use router::{assessment_router, ApiError, AssessmentApi};
pub use scoring::{Level, RiskFlag, ScaleScore};
pub use service::{
    FinishOutcome, QuestionView, SessionDetail, SessionService, SessionServiceError, SessionStart,
    TestDetail,
};
pub use sqlite::SqliteStore;
pub use store::{AssessmentStore, OpenedSession, StoreError};
