//! Pipeline orchestration: extraction → verification → anomaly detection →
//! reporting over one checkpointed [`AuditState`].
//!
//! A failed stage never aborts the run. Its error is appended to the audit
//! record and the next stage runs with whatever inputs exist; stages missing
//! prerequisites fail in turn. The state is checkpointed after every stage so
//! an interrupted thread resumes where it stopped.

mod state;

pub use state::{
    cancellation, fingerprint, AuditReport, AuditState, CancellationHandle, CancellationSignal,
    Progress, RunOutcome, RunStatus, Stage, StageOutcome, StageRecord, StageStatus,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use spendshield_ledger::date::{now_rfc3339, parse_date, today_utc};
use spendshield_ledger::{CheckpointStore, ExpenditureRecord, Ledger, NewFlag, StorageError};
use time::Date;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::anomaly::detect_with_ledger;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{
    AnomalyDetectionError, ExtractionError, PipelineError, ReportingError, VerificationError,
};
use crate::extractor::{DocumentExtractor, Extraction, RawDocument};
use crate::scoring;
use crate::types::{
    AnomalyFlag, ExtractedDocument, FlagType, RiskAssessment, VerificationResult,
};
use crate::verify::verify;

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reference date for the pricing window and vendor-age rule. Defaults
    /// to today (UTC). Ignored when resuming; the checkpoint's date wins.
    pub as_of: Option<Date>,
    pub cancel: CancellationSignal,
}

/// Runs analyses. Cheap to share: wrap in an `Arc` and call from many tasks.
///
/// At most one run per thread id is in flight at a time; a second concurrent
/// run of the same thread is refused with [`PipelineError::ThreadBusy`].
pub struct Pipeline {
    ledger: Arc<dyn Ledger>,
    checkpoints: Arc<dyn CheckpointStore>,
    extractor: Arc<dyn DocumentExtractor>,
    config: EngineConfig,
    running: Mutex<HashSet<String>>,
}

/// Marks a thread as running until dropped.
struct RunClaim<'a> {
    running: &'a Mutex<HashSet<String>>,
    thread_id: String,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.thread_id);
    }
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        checkpoints: Arc<dyn CheckpointStore>,
        extractor: Arc<dyn DocumentExtractor>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger,
            checkpoints,
            extractor,
            config,
            running: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyze `document` under a fresh thread id.
    pub async fn analyze(
        &self,
        document: &RawDocument,
        options: RunOptions,
    ) -> Result<AuditState, PipelineError> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        self.run(&thread_id, document, options).await
    }

    /// Run `document` under `thread_id`, resuming from its checkpoint if one
    /// exists. A completed thread is returned unchanged.
    ///
    /// Returns `Err` only for orchestrator failures: an unusable checkpoint,
    /// a thread started for different bytes, a thread already running, or
    /// cancellation.
    #[instrument(skip(self, document, options), fields(document = %document.name))]
    pub async fn run(
        &self,
        thread_id: &str,
        document: &RawDocument,
        options: RunOptions,
    ) -> Result<AuditState, PipelineError> {
        let RunOptions { as_of, mut cancel } = options;
        let _claim = self.claim(thread_id)?;
        let digest = fingerprint(&document.bytes);

        let mut state = match self.load(thread_id).await? {
            Some(state) => {
                if state.fingerprint != digest {
                    return Err(PipelineError::ThreadConflict {
                        thread_id: thread_id.to_string(),
                        expected: state.fingerprint,
                        found: digest,
                    });
                }
                if state.status == RunStatus::Completed {
                    info!("thread already completed");
                    return Ok(state);
                }
                info!(after = ?state.current_stage, "resuming thread");
                state
            }
            None => {
                let as_of = as_of.unwrap_or_else(today_utc);
                info!(%as_of, "starting analysis");
                AuditState::new(thread_id, &document.name, digest, as_of, now_rfc3339())
            }
        };

        while let Some(stage) = state.current_stage.next_stage() {
            if cancel.is_cancelled() {
                return self.abandon(state, stage).await;
            }

            debug!(%stage, "running stage");
            state = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(state, stage).await,
                next = self.step(stage, state.clone(), document) => next,
            };
            if let Some(failure) = state.stage_log.last().and_then(|r| r.error.as_deref()) {
                warn!(%stage, error = failure, "stage failed");
            }

            if stage == Stage::Reporting {
                state = state.finish(now_rfc3339());
            }
            self.save(&state).await?;
        }

        let assessment = state.assessment.as_ref();
        info!(
            outcome = %state.outcome(),
            flag_count = state.anomalies.len(),
            score = ?assessment.map(|a| a.fraud_risk_score),
            risk_level = ?assessment.map(|a| a.risk_level),
            "analysis complete"
        );
        Ok(state)
    }

    fn claim(&self, thread_id: &str) -> Result<RunClaim<'_>, PipelineError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(thread_id.to_string()) {
            warn!(thread_id, "thread already running");
            return Err(PipelineError::ThreadBusy {
                thread_id: thread_id.to_string(),
            });
        }
        Ok(RunClaim {
            running: &self.running,
            thread_id: thread_id.to_string(),
        })
    }

    /// The checkpointed report for `thread_id`, if the thread exists.
    pub async fn report(&self, thread_id: &str) -> Result<Option<AuditReport>, PipelineError> {
        Ok(self.load(thread_id).await?.map(|s| AuditReport::from(&s)))
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    async fn step(&self, stage: Stage, state: AuditState, document: &RawDocument) -> AuditState {
        match stage {
            Stage::Extraction => {
                let outcome = self.extract_stage(document).await;
                state.apply_extraction(outcome.into())
            }
            Stage::Verification => {
                let outcome = self.verify_stage(&state).await;
                state.apply_verification(outcome.into())
            }
            Stage::AnomalyDetection => {
                let outcome = self.detect_stage(&state).await;
                state.apply_anomalies(outcome.into())
            }
            Stage::Reporting => {
                let outcome = self.report_stage(&state).await;
                state.apply_report(outcome.into())
            }
        }
    }

    async fn extract_stage(&self, document: &RawDocument) -> Result<Extraction, ExtractionError> {
        let limit = Duration::from_millis(self.config.pipeline.extraction_timeout_ms);
        timeout(limit, self.extractor.extract(document))
            .await
            .unwrap_or(Err(ExtractionError::Timeout(limit)))
    }

    async fn verify_stage(&self, state: &AuditState) -> Result<VerificationResult, VerificationError> {
        let extracted = state
            .extracted
            .as_ref()
            .ok_or(VerificationError::MissingExtraction)?;
        let limit = self.stage_timeout();
        timeout(
            limit,
            verify(
                &*self.ledger,
                extracted,
                &self.config.verification,
                state.as_of,
            ),
        )
        .await
        .unwrap_or(Err(VerificationError::Timeout(limit)))
    }

    async fn detect_stage(&self, state: &AuditState) -> Result<Vec<AnomalyFlag>, AnomalyDetectionError> {
        let extracted = state
            .extracted
            .as_ref()
            .ok_or(AnomalyDetectionError::MissingExtraction)?;
        let verification = state
            .verification
            .as_ref()
            .ok_or(AnomalyDetectionError::MissingVerification)?;
        let limit = self.stage_timeout();
        timeout(
            limit,
            detect_with_ledger(
                &*self.ledger,
                extracted,
                verification,
                state.as_of,
                &self.config.anomaly,
            ),
        )
        .await
        .unwrap_or(Err(AnomalyDetectionError::Timeout(limit)))
    }

    async fn report_stage(&self, state: &AuditState) -> Result<RiskAssessment, ReportingError> {
        if !state.stage_completed(Stage::AnomalyDetection) {
            return Err(ReportingError::MissingPrerequisite(
                "anomaly detection did not complete",
            ));
        }
        let assessment = scoring::score(
            &state.anomalies,
            state.verification.as_ref(),
            &self.config.scoring,
        );
        let limit = self.stage_timeout();
        timeout(limit, self.persist(state, &assessment))
            .await
            .unwrap_or(Err(ReportingError::Timeout(limit)))?;
        Ok(assessment)
    }

    async fn persist(
        &self,
        state: &AuditState,
        assessment: &RiskAssessment,
    ) -> Result<(), ReportingError> {
        let extracted = state.extracted.as_ref();
        let vendor_id = state
            .verification
            .as_ref()
            .and_then(|v| v.vendor_id.as_deref())
            .or_else(|| extracted.and_then(|d| d.vendor_id.as_deref()));

        let duplicate = state
            .anomalies
            .iter()
            .any(|a| a.flag_type == FlagType::DuplicateInvoice);
        if self.config.pipeline.record_expenditure && !duplicate {
            if let Some(doc) = extracted {
                self.record_expenditure(doc, vendor_id, &state.thread_id)
                    .await?;
            }
        }

        if state.anomalies.is_empty() {
            return Ok(());
        }
        let flags: Vec<NewFlag> = state.anomalies.iter().map(AnomalyFlag::to_new_flag).collect();
        let written = self
            .ledger
            .persist_flags(
                &state.thread_id,
                vendor_id,
                extracted.map(|d| d.reference_number.as_str()),
                &flags,
                assessment.fraud_risk_score,
            )
            .await;
        match written {
            Ok(()) => Ok(()),
            // A resumed report whose earlier attempt wrote flags but never
            // checkpointed.
            Err(StorageError::AlreadyExists { kind: "flags", .. }) => {
                debug!("flags already persisted for this thread");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert the analyzed document. A reference already recorded by this
    /// same thread counts as recorded; one recorded by anyone else is a
    /// conflict.
    async fn record_expenditure(
        &self,
        doc: &ExtractedDocument,
        vendor_id: Option<&str>,
        thread_id: &str,
    ) -> Result<(), ReportingError> {
        let record = expenditure_record(doc, vendor_id, thread_id);
        match self.ledger.insert_expenditure(record).await {
            Ok(()) => {
                debug!(reference = %doc.reference_number, "expenditure recorded");
                Ok(())
            }
            Err(StorageError::DuplicateReference { reference_number }) => {
                let existing = self.ledger.reference_number_exists(&reference_number).await?;
                if existing.and_then(|r| r.thread_id).as_deref() != Some(thread_id) {
                    return Err(StorageError::DuplicateReference { reference_number }.into());
                }
                debug!(reference = %reference_number, "expenditure already recorded by this thread");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.config.pipeline.stage_timeout_ms)
    }

    // ── Checkpoints ──────────────────────────────────────────────────────────

    async fn load(&self, thread_id: &str) -> Result<Option<AuditState>, PipelineError> {
        let Some(record) = self.checkpoints.load_checkpoint(thread_id).await? else {
            return Ok(None);
        };
        serde_json::from_value(record.state)
            .map(Some)
            .map_err(|source| PipelineError::CorruptCheckpoint {
                thread_id: thread_id.to_string(),
                source,
            })
    }

    async fn save(&self, state: &AuditState) -> Result<(), PipelineError> {
        let value =
            serde_json::to_value(state).map_err(|source| PipelineError::CorruptCheckpoint {
                thread_id: state.thread_id.clone(),
                source,
            })?;
        self.checkpoints
            .save_checkpoint(&state.thread_id, value)
            .await?;
        Ok(())
    }

    async fn abandon(&self, state: AuditState, stage: Stage) -> Result<AuditState, PipelineError> {
        warn!(%stage, "run cancelled");
        let state = state.cancelled(stage);
        self.save(&state).await?;
        Err(PipelineError::Cancelled {
            thread_id: state.thread_id,
            stage: stage.to_string(),
        })
    }
}

/// The ledger row for an analyzed document. Item fields come from the first
/// line item.
fn expenditure_record(
    doc: &ExtractedDocument,
    vendor_id: Option<&str>,
    thread_id: &str,
) -> ExpenditureRecord {
    let first = doc.line_items.first();
    ExpenditureRecord {
        vendor_id: vendor_id.map(str::to_string),
        document_type: doc.document_type.as_str().to_string(),
        reference_number: doc.reference_number.clone(),
        transaction_date: doc.date.clone(),
        amount: doc.amount,
        item_description: first.map(|i| i.description.clone()),
        quantity: first.and_then(|i| i.quantity.trunc().to_i64()),
        unit_price: first.map(|i| i.unit_price),
        approval_authority: doc.approval_authority.clone(),
        department: None,
        fiscal_year: parse_date(&doc.date).ok().map(|d| d.year()),
        thread_id: Some(thread_id.to_string()),
    }
}
