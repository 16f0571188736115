//! SpendShield engine: turns one procurement document into a fraud-risk
//! assessment.
//!
//! The pipeline runs four stages over a checkpointed audit record:
//! extraction (a [`DocumentExtractor`]), verification against a
//! [`Ledger`](spendshield_ledger::Ledger), rule-based anomaly detection and
//! scoring with persistence. A failing stage is recorded and the run goes on.
//!
//! The rule set ([`anomaly::detect`]) and the scorer ([`scoring::score`]) are
//! pure; everything touching the ledger is async.

pub mod anomaly;
pub mod config;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod scoring;
pub mod types;
pub mod verify;

pub use config::{
    AnomalyConfig, ConfigError, EngineConfig, PipelineConfig, ScoringConfig, VerificationConfig,
};
pub use error::{
    AnomalyDetectionError, ExtractionError, PipelineError, ReportingError, StageError,
    VerificationError,
};
pub use extractor::{
    DocumentExtractor, DocumentFormat, Extraction, JsonExtractor, LlmExtractor, RawDocument,
    StaticExtractor,
};
pub use pipeline::{
    cancellation, AuditReport, AuditState, CancellationHandle, CancellationSignal, Pipeline,
    RunOptions, RunOutcome, RunStatus,
};
pub use types::{
    AnomalyFlag, DocumentType, ExtractedDocument, FlagType, LineItem, RiskAssessment, RiskLevel,
    Severity, VerificationResult,
};
