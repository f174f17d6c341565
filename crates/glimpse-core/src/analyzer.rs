//! Seam to the external face-analysis service.

use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face-analysis service unavailable: {0}")]
    Unavailable(String),
    #[error("analysis request failed: {0}")]
    RequestFailed(String),
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),
}

/// Detection + landmarks + descriptor for a single frame.
///
/// `frame` is interleaved RGB8, `width * height * 3` bytes. Implementations
/// return `Ok(None)` when no face is present and at most one detection
/// otherwise.
#[allow(async_fn_in_trait)]
pub trait FaceAnalyzer {
    async fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, AnalyzerError>;
}

/// Decode the service's JSON payload: one detection, or `null`/empty for no face.
pub fn decode_detection(payload: &str) -> Result<Option<Detection>, AnalyzerError> {
    let payload = payload.trim();
    if payload.is_empty() || payload == "null" {
        return Ok(None);
    }
    let detection: Detection = serde_json::from_str(payload)
        .map_err(|e| AnalyzerError::InvalidResponse(format!("detection payload: {e}")))?;
    detection.validate().map_err(AnalyzerError::InvalidResponse)?;
    Ok(Some(detection))
}
