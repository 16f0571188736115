use std::time::Duration;

use spendshield_ledger::StorageError;

/// The document extractor could not produce a valid `ExtractedDocument`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed extractor output: {0}")]
    Malformed(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl ExtractionError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtractionError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("no extracted document to verify")]
    MissingExtraction,

    #[error(transparent)]
    Ledger(#[from] StorageError),

    #[error("malformed vendor record {vendor_id}: {reason}")]
    MalformedVendor { vendor_id: String, reason: String },

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum AnomalyDetectionError {
    #[error("missing required data for anomaly detection: no extracted document")]
    MissingExtraction,

    #[error("missing required data for anomaly detection: no verification result")]
    MissingVerification,

    #[error(transparent)]
    Ledger(#[from] StorageError),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    #[error("cannot report: {0}")]
    MissingPrerequisite(&'static str),

    #[error("failed to persist results: {0}")]
    Persistence(#[from] StorageError),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

/// A failed stage. The `Display` text is what gets appended to the audit
/// record's error list.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Anomaly detection error: {0}")]
    AnomalyDetection(#[from] AnomalyDetectionError),

    #[error("Reporting error: {0}")]
    Reporting(#[from] ReportingError),
}

/// Failures of the orchestrator itself. Stage failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] StorageError),

    #[error("checkpoint for thread {thread_id} is unreadable: {source}")]
    CorruptCheckpoint {
        thread_id: String,
        source: serde_json::Error,
    },

    #[error(
        "thread {thread_id} was started for a different document \
         (checkpoint fingerprint {expected}, submitted {found})"
    )]
    ThreadConflict {
        thread_id: String,
        expected: String,
        found: String,
    },

    #[error("thread {thread_id} cancelled during {stage}")]
    Cancelled { thread_id: String, stage: String },

    #[error("thread {thread_id} is already running")]
    ThreadBusy { thread_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_errors_are_prefixed_by_stage() {
        let err = StageError::from(ExtractionError::Malformed("expected value".to_string()));
        assert_eq!(
            err.to_string(),
            "Extraction error: malformed extractor output: expected value"
        );

        let err = StageError::from(AnomalyDetectionError::MissingVerification);
        assert!(err.to_string().starts_with("Anomaly detection error: "));

        let err = StageError::from(ReportingError::MissingPrerequisite(
            "anomaly detection did not complete",
        ));
        assert_eq!(
            err.to_string(),
            "Reporting error: cannot report: anomaly detection did not complete"
        );
    }

    #[test]
    fn ledger_errors_pass_through_verbatim() {
        let err = StageError::from(VerificationError::from(StorageError::AmbiguousVendor {
            fragment: "Office".to_string(),
            candidates: vec!["VND001".to_string(), "VND003".to_string()],
        }));
        assert_eq!(
            err.to_string(),
            "Verification error: vendor name 'Office' is ambiguous: matches VND001, VND003"
        );
    }

    #[test]
    fn timeouts_report_seconds() {
        let err = ExtractionError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1.5s");
    }
}
