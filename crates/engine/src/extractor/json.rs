use async_trait::async_trait;

use super::{strip_code_fences, validate_extracted, DocumentExtractor, Extraction, RawDocument};
use crate::error::ExtractionError;

/// Reads documents that are already structured: the bytes are a JSON record
/// in the extracted-document shape. An optional top-level `rationale` string
/// is carried through.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

impl JsonExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for JsonExtractor {
    async fn extract(&self, document: &RawDocument) -> Result<Extraction, ExtractionError> {
        let text = std::str::from_utf8(&document.bytes).map_err(|e| {
            ExtractionError::UnsupportedFormat(format!("{} is not UTF-8 text: {e}", document.name))
        })?;
        let mut value: serde_json::Value = serde_json::from_str(strip_code_fences(text))
            .map_err(|e| ExtractionError::Malformed(format!("{}: {e}", document.name)))?;

        let rationale = value
            .as_object_mut()
            .and_then(|obj| obj.remove("rationale"))
            .and_then(|r| r.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("Structured record read from {}", document.name));

        Ok(Extraction {
            document: validate_extracted(value)?,
            rationale,
        })
    }
}
