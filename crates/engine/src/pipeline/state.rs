//! The audit record threaded through the pipeline, and what gets folded into it.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use time::Date;
use tokio::sync::watch;

use crate::error::StageError;
use crate::extractor::Extraction;
use crate::types::{AnomalyFlag, ExtractedDocument, RiskAssessment, RiskLevel, VerificationResult};

// ──────────────────────────────────────────────
// Stages
// ──────────────────────────────────────────────

/// The four units of work, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Verification,
    AnomalyDetection,
    Reporting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Verification => "verification",
            Stage::AnomalyDetection => "anomaly_detection",
            Stage::Reporting => "reporting",
        }
    }

    /// The progress marker recorded once this stage has run.
    pub fn marker(&self) -> Progress {
        match self {
            Stage::Extraction => Progress::Extracted,
            Stage::Verification => Progress::Verified,
            Stage::AnomalyDetection => Progress::Analyzed,
            Stage::Reporting => Progress::Reported,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last executed stage: `pending → extracted → verified → analyzed → reported`.
///
/// A stage counts as executed whether it completed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Pending,
    Extracted,
    Verified,
    Analyzed,
    Reported,
}

impl Progress {
    /// The stage that runs next, or `None` once reported.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            Progress::Pending => Some(Stage::Extraction),
            Progress::Extracted => Some(Stage::Verification),
            Progress::Verified => Some(Stage::AnomalyDetection),
            Progress::Analyzed => Some(Stage::Reporting),
            Progress::Reported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Cancelled,
}

/// One line of the stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a stage hands back to the orchestrator.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(StageError),
}

impl<T, E: Into<StageError>> From<Result<T, E>> for StageOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => StageOutcome::Completed(value),
            Err(err) => StageOutcome::Failed(err.into()),
        }
    }
}

// ──────────────────────────────────────────────
// Audit state
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every stage ran. Says nothing about whether they succeeded.
    Completed,
}

/// Derived view: did every stage that ran succeed?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Clean,
    Degraded,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Clean => "clean",
            RunOutcome::Degraded => "degraded",
        })
    }
}

/// The record of one analysis.
///
/// Updates consume the state and return the next one. A field, once set, is
/// never cleared; `anomalies`, `errors` and `stage_log` only grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditState {
    pub thread_id: String,
    pub document_name: String,
    /// SHA-256 hex digest of the raw document bytes.
    pub fingerprint: String,
    /// Reference date for pricing lookback and vendor-age rules.
    #[serde(with = "iso_date")]
    pub as_of: Date,
    pub status: RunStatus,
    pub current_stage: Progress,
    #[serde(default)]
    pub extracted: Option<ExtractedDocument>,
    #[serde(default)]
    pub extraction_rationale: Option<String>,
    #[serde(default)]
    pub verification: Option<VerificationResult>,
    #[serde(default)]
    pub anomalies: Vec<AnomalyFlag>,
    #[serde(default)]
    pub assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub stage_log: Vec<StageRecord>,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl AuditState {
    pub fn new(
        thread_id: impl Into<String>,
        document_name: impl Into<String>,
        fingerprint: impl Into<String>,
        as_of: Date,
        started_at: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            document_name: document_name.into(),
            fingerprint: fingerprint.into(),
            as_of,
            status: RunStatus::Running,
            current_stage: Progress::Pending,
            extracted: None,
            extraction_rationale: None,
            verification: None,
            anomalies: Vec::new(),
            assessment: None,
            errors: Vec::new(),
            stage_log: Vec::new(),
            started_at: started_at.into(),
            finished_at: None,
        }
    }

    pub fn apply_extraction(self, outcome: StageOutcome<Extraction>) -> Self {
        self.fold(Stage::Extraction, outcome, |state, extraction| {
            state.extracted = Some(extraction.document);
            state.extraction_rationale = Some(extraction.rationale);
        })
    }

    pub fn apply_verification(self, outcome: StageOutcome<VerificationResult>) -> Self {
        self.fold(Stage::Verification, outcome, |state, result| {
            state.verification = Some(result);
        })
    }

    pub fn apply_anomalies(self, outcome: StageOutcome<Vec<AnomalyFlag>>) -> Self {
        self.fold(Stage::AnomalyDetection, outcome, |state, flags| {
            state.anomalies.extend(flags);
        })
    }

    pub fn apply_report(self, outcome: StageOutcome<RiskAssessment>) -> Self {
        self.fold(Stage::Reporting, outcome, |state, assessment| {
            state.assessment = Some(assessment);
        })
    }

    /// Record that `stage` was interrupted. The progress marker stays put so
    /// a resumed run repeats the stage.
    pub fn cancelled(mut self, stage: Stage) -> Self {
        self.errors.push(format!("{} cancelled", stage_title(stage)));
        self.stage_log.push(StageRecord {
            stage,
            status: StageStatus::Cancelled,
            error: None,
        });
        self
    }

    /// Mark the run terminal.
    pub fn finish(mut self, finished_at: impl Into<String>) -> Self {
        self.status = RunStatus::Completed;
        self.finished_at = Some(finished_at.into());
        self
    }

    fn fold<T>(
        mut self,
        stage: Stage,
        outcome: StageOutcome<T>,
        apply: impl FnOnce(&mut Self, T),
    ) -> Self {
        let record = match outcome {
            StageOutcome::Completed(value) => {
                apply(&mut self, value);
                StageRecord {
                    stage,
                    status: StageStatus::Completed,
                    error: None,
                }
            }
            StageOutcome::Failed(err) => {
                let message = err.to_string();
                self.errors.push(message.clone());
                StageRecord {
                    stage,
                    status: StageStatus::Failed,
                    error: Some(message),
                }
            }
        };
        self.stage_log.push(record);
        self.current_stage = stage.marker();
        self
    }

    /// Whether the latest run of `stage` completed.
    pub fn stage_completed(&self, stage: Stage) -> bool {
        self.stage_log
            .iter()
            .rev()
            .find(|r| r.stage == stage && r.status != StageStatus::Cancelled)
            .is_some_and(|r| r.status == StageStatus::Completed)
    }

    /// `Degraded` when any stage failed. Cancellation notes alone do not
    /// degrade a run that was later resumed to completion.
    pub fn outcome(&self) -> RunOutcome {
        if self
            .stage_log
            .iter()
            .any(|r| r.status == StageStatus::Failed)
        {
            RunOutcome::Degraded
        } else {
            RunOutcome::Clean
        }
    }
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Extraction => "Extraction",
        Stage::Verification => "Verification",
        Stage::AnomalyDetection => "Anomaly detection",
        Stage::Reporting => "Reporting",
    }
}

/// SHA-256 hex digest of raw document bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

mod iso_date {
    use super::*;
    use spendshield_ledger::date::parse_date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(date)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_date(&s).map_err(serde::de::Error::custom)
    }
}

// ──────────────────────────────────────────────
// Report
// ──────────────────────────────────────────────

/// The caller-facing view of an audit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub thread_id: String,
    pub document_name: String,
    pub status: RunStatus,
    pub outcome: RunOutcome,
    pub fraud_risk_score: Option<Decimal>,
    pub risk_level: Option<RiskLevel>,
    pub recommendations: Vec<String>,
    pub anomalies: Vec<AnomalyFlag>,
    pub extracted: Option<ExtractedDocument>,
    pub extraction_rationale: Option<String>,
    pub verification: Option<VerificationResult>,
    pub errors: Vec<String>,
    pub stage_log: Vec<StageRecord>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl From<&AuditState> for AuditReport {
    fn from(state: &AuditState) -> Self {
        let assessment = state.assessment.as_ref();
        Self {
            thread_id: state.thread_id.clone(),
            document_name: state.document_name.clone(),
            status: state.status,
            outcome: state.outcome(),
            fraud_risk_score: assessment.map(|a| a.fraud_risk_score),
            risk_level: assessment.map(|a| a.risk_level),
            recommendations: assessment
                .map(|a| a.recommendations.clone())
                .unwrap_or_default(),
            anomalies: state.anomalies.clone(),
            extracted: state.extracted.clone(),
            extraction_rationale: state.extraction_rationale.clone(),
            verification: state.verification.clone(),
            errors: state.errors.clone(),
            stage_log: state.stage_log.clone(),
            started_at: state.started_at.clone(),
            finished_at: state.finished_at.clone(),
        }
    }
}

// ──────────────────────────────────────────────
// Cancellation
// ──────────────────────────────────────────────

/// Triggers cancellation of every run holding a matching signal.
#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

/// Observed by a run between stages and raced against each stage.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

/// A connected handle and signal.
pub fn cancellation() -> (CancellationHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationSignal { rx: Some(rx) })
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|c| *c).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::never()
    }
}
