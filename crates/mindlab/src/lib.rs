//! MindLab: standardized psychological self-assessments with scored, interpreted reports.

pub mod assessment;
pub mod config;
pub mod error;
pub mod telemetry;
