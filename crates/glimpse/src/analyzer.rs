//! D-Bus client for the external face-analysis service.
//!
//! The service owns detection, 68-point landmark regression and descriptor
//! embedding. It is called once per frame with the raw RGB pixels and answers
//! with a JSON-encoded detection, or an empty string / `null` when no face is
//! in view.

use glimpse_core::{decode_detection, AnalyzerError, Detection, FaceAnalyzer};

use crate::config::{BusKind, Config};

// `#[zbus::proxy]` generates `FaceAnalysisProxy` (async) and a blocking twin;
// only the async proxy is used.
#[zbus::proxy(
    interface = "org.glimpse.FaceAnalysis1",
    default_service = "org.glimpse.FaceAnalysis1",
    default_path = "/org/glimpse/FaceAnalysis1"
)]
trait FaceAnalysis {
    async fn analyze(&self, width: u32, height: u32, rgb: &[u8]) -> zbus::Result<String>;
}

/// [`FaceAnalyzer`] backed by the D-Bus face-analysis service.
pub struct RemoteAnalyzer {
    proxy: FaceAnalysisProxy<'static>,
}

impl RemoteAnalyzer {
    /// Connect to the configured bus and bind the service proxy.
    pub async fn connect(config: &Config) -> Result<Self, AnalyzerError> {
        let conn = match config.analyzer_bus {
            BusKind::Session => zbus::Connection::session().await,
            BusKind::System => zbus::Connection::system().await,
        }
        .map_err(|e| AnalyzerError::Unavailable(format!("bus connection: {e}")))?;

        let proxy = FaceAnalysisProxy::builder(&conn)
            .destination(config.analyzer_service.clone())
            .and_then(|b| b.path(config.analyzer_path.clone()))
            .map_err(|e| AnalyzerError::Unavailable(format!("invalid service address: {e}")))?
            .build()
            .await
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;

        tracing::info!(
            bus = ?config.analyzer_bus,
            service = %config.analyzer_service,
            path = %config.analyzer_path,
            "face-analysis proxy ready"
        );

        Ok(Self { proxy })
    }
}

impl FaceAnalyzer for RemoteAnalyzer {
    async fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, AnalyzerError> {
        let payload = self
            .proxy
            .analyze(width, height, frame)
            .await
            .map_err(|e| AnalyzerError::RequestFailed(e.to_string()))?;
        decode_detection(&payload)
    }
}
