use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use glimpse_core::{
    AnalyzerError, Detection, EuclideanMatcher, FaceAnalyzer, Gallery, GalleryError,
    LivenessThresholds, Matcher, RecognitionEntry, RecognitionLog, SessionState,
};
use glimpse_hw::{CameraError, FrameSource};

use crate::config::Config;
use crate::overlay::Overlay;
use crate::surface::Surface;

const READY_STATUS: &str = "Ready. Type enroll or recognize to start.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("face not detected")]
    NoFaceDetected,
    #[error("name required")]
    EmptyName,
    #[error("liveness check failed")]
    LivenessNotPassed,
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to start engine thread: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<GalleryError> for EngineError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::EmptyName => EngineError::EmptyName,
        }
    }
}

/// Synchronous name entry used during enrollment.
pub trait NamePrompt: Send {
    /// Ask for a name; `None` when the prompt was dismissed.
    fn ask(&mut self, message: &str) -> Option<String>;
}

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollResult {
    pub label: String,
    /// Number of enrolled faces after this one.
    pub count: usize,
}

/// Point-in-time view of the session, as shown by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub blinked: bool,
    pub head_moved: bool,
    pub liveness_passed: bool,
    pub recognizing: bool,
    pub status: String,
    pub enrolled: Vec<String>,
    pub recognized: Vec<String>,
}

/// What one detection tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stream not running.
    Idle,
    NoFace,
    Face,
    /// The stream was stopped while analysis was in flight; the result was dropped.
    Cancelled,
    /// Capture or analysis failed; logged and skipped.
    Failed,
}

/// Owns the camera, the session state and the gallery; drives the detection loop.
pub struct Orchestrator<S, A, U> {
    source: S,
    analyzer: A,
    surface: U,
    matcher: EuclideanMatcher,
    thresholds: LivenessThresholds,
    dedup_window: Duration,
    config: Config,
    gallery: Gallery,
    session: SessionState,
    log: RecognitionLog,
    running: bool,
    status: String,
    /// Stream generation; bumped by [`EngineHandle::exit`] before the exit is queued.
    stop_rx: watch::Receiver<u64>,
}

impl<S: FrameSource, A: FaceAnalyzer, U: Surface> Orchestrator<S, A, U> {
    pub fn new(
        config: &Config,
        source: S,
        analyzer: A,
        surface: U,
        stop_rx: watch::Receiver<u64>,
    ) -> Self {
        Self {
            source,
            analyzer,
            surface,
            matcher: EuclideanMatcher {
                distance_threshold: config.match_distance_threshold,
            },
            thresholds: config.thresholds(),
            dedup_window: config.dedup_window(),
            config: config.clone(),
            gallery: Gallery::default(),
            session: SessionState::default(),
            log: RecognitionLog::with_capacity(config.recognized_log_capacity),
            running: false,
            status: String::new(),
            stop_rx,
        }
    }

    fn set_status(&mut self, text: &str) {
        self.status = text.to_string();
        self.surface.status_changed(&self.status);
    }

    fn append_status(&mut self, text: &str) {
        self.status.push_str(text);
        self.surface.status_changed(&self.status);
    }

    fn camera_failure(&mut self, err: CameraError) -> EngineError {
        tracing::error!(error = %err, "camera unavailable");
        self.set_status(&format!("Camera unavailable: {err}"));
        EngineError::CameraUnavailable(err)
    }

    /// Acquire the camera. A running stream is left as is.
    pub fn start_stream(&mut self) -> Result<(), EngineError> {
        if self.running {
            return Ok(());
        }
        if let Err(e) = self.source.open() {
            return Err(self.camera_failure(e));
        }
        self.running = true;
        tracing::info!("stream started");
        Ok(())
    }

    /// Release the camera and wipe all liveness and recognition state.
    pub fn stop_stream(&mut self) {
        self.source.release();
        self.running = false;
        self.surface.overlay_changed(None);
        self.session.reset();
        self.set_status("Camera stopped.");
        tracing::info!("stream stopped, session reset");
    }

    /// One pass of the detection loop.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "tick: frame capture failed");
                return TickOutcome::Failed;
            }
        };

        let detection = if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "tick: dark frame");
            None
        } else {
            // Only a stop issued while this request is in flight cancels it.
            let _ = self.stop_rx.borrow_and_update();
            let result = tokio::select! {
                result = self.analyzer.analyze(&frame.data, frame.width, frame.height) => result,
                _ = self.stop_rx.changed() => {
                    tracing::info!(seq = frame.sequence, "tick: stream stopped mid-request, result discarded");
                    return TickOutcome::Cancelled;
                }
            };
            match result {
                Ok(detection) => detection,
                Err(e) => {
                    tracing::warn!(error = %e, "tick: analysis failed");
                    return TickOutcome::Failed;
                }
            }
        };

        self.apply_detection(detection, (frame.width, frame.height), Instant::now())
    }

    fn apply_detection(
        &mut self,
        detection: Option<Detection>,
        frame_size: (u32, u32),
        now: Instant,
    ) -> TickOutcome {
        let Some(detection) = detection else {
            self.surface.overlay_changed(None);
            return TickOutcome::NoFace;
        };

        let display = self.config.display_size(frame_size);
        let resized = detection.resized(frame_size, display);
        let mut overlay = Overlay::from_detection(&resized, display);

        let update = self
            .session
            .liveness
            .observe(&resized.landmarks, &self.thresholds);
        if update.blink_detected {
            tracing::info!(ear = ?update.ear, "blink detected");
            self.set_status("Blink detected.");
        }
        if update.head_move_detected {
            tracing::info!("head movement detected");
            self.append_status(" Head movement detected.");
        }
        if update.passed {
            tracing::info!("liveness passed");
            self.set_status("Liveness confirmed (blink + head movement)");
        }

        if self.session.recognition_active() && !self.gallery.is_empty() {
            let result = self
                .matcher
                .best_match(&resized.descriptor, self.gallery.faces());
            let features = resized
                .landmarks
                .regions()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            self.set_status(&format!(
                "Recognized: {} | Features used: {features}",
                result.label
            ));

            if self
                .session
                .recognition
                .should_record(&result.label, now, self.dedup_window)
            {
                tracing::info!(label = %result.label, distance = result.distance, "face recognized");
                self.log.push(RecognitionEntry {
                    label: result.label.clone(),
                    at: Local::now(),
                });
                self.surface.recognized_changed(&self.log.lines());
            }
            overlay.label = Some(result.label);
        }

        self.surface.overlay_changed(Some(&overlay));
        TickOutcome::Face
    }

    /// Capture one descriptor and store it under a prompted name.
    pub async fn enroll(&mut self, prompt: &mut dyn NamePrompt) -> Result<EnrollResult, EngineError> {
        self.start_stream()?;

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => return Err(self.camera_failure(e)),
        };

        let detection = if frame.is_dark {
            None
        } else {
            match self
                .analyzer
                .analyze(&frame.data, frame.width, frame.height)
                .await
            {
                Ok(detection) => detection,
                Err(e) => {
                    tracing::error!(error = %e, "enroll: analysis failed");
                    self.set_status(&format!("Face analysis failed: {e}"));
                    return Err(e.into());
                }
            }
        };

        let Some(detection) = detection else {
            tracing::info!("enroll: no face in frame");
            self.set_status("Face not detected.");
            return Err(EngineError::NoFaceDetected);
        };

        let name = prompt.ask("Enter your name:").unwrap_or_default();
        let label = match self.gallery.enroll(&name, detection.descriptor) {
            Ok(face) => face.label.clone(),
            Err(e) => {
                tracing::info!("enroll: cancelled, empty name");
                self.set_status("Enrollment cancelled. Name is required.");
                return Err(e.into());
            }
        };

        let count = self.gallery.len();
        tracing::info!(label = %label, count, "enrolled successfully");
        self.set_status(&format!("Face enrolled for {label}."));
        self.surface.enrolled_changed(&self.gallery.labels());
        Ok(EnrollResult { label, count })
    }

    /// Turn recognition on. Refused until liveness has passed.
    pub fn recognize(&mut self) -> Result<(), EngineError> {
        if !self.session.liveness.passed() {
            tracing::info!("recognize refused: liveness not passed");
            self.set_status("Liveness check failed. Blink and move your head.");
            return Err(EngineError::LivenessNotPassed);
        }
        self.start_stream()?;
        self.session.recognition.recognizing = true;
        tracing::info!(enrolled = self.gallery.len(), "recognition enabled");
        Ok(())
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.running,
            blinked: self.session.liveness.blinked(),
            head_moved: self.session.liveness.head_moved(),
            liveness_passed: self.session.liveness.passed(),
            recognizing: self.session.recognition.recognizing,
            status: self.status.clone(),
            enrolled: self.gallery.labels(),
            recognized: self.log.lines(),
        }
    }

    fn shutdown(&mut self) {
        if self.running {
            self.source.release();
            self.running = false;
        }
    }

    async fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Enroll { mut prompt, reply } => {
                let result = self.enroll(prompt.as_mut()).await;
                let _ = reply.send(result);
            }
            EngineRequest::Recognize { reply } => {
                let _ = reply.send(self.recognize());
            }
            EngineRequest::Exit { reply } => {
                self.stop_stream();
                let _ = reply.send(());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }
}

/// Messages sent from the console to the engine thread.
enum EngineRequest {
    Enroll {
        prompt: Box<dyn NamePrompt>,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    Recognize {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Exit {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    stop_tx: Arc<watch::Sender<u64>>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Request enrollment: capture one face, ask for its name, store it.
    pub async fn enroll(&self, prompt: Box<dyn NamePrompt>) -> Result<EnrollResult, EngineError> {
        self.call(|reply| EngineRequest::Enroll { prompt, reply })
            .await?
    }

    /// Request recognition mode.
    pub async fn recognize(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Recognize { reply }).await?
    }

    /// Stop the stream and reset the session. An analysis in flight is discarded.
    pub async fn exit(&self) -> Result<(), EngineError> {
        self.stop_tx.send_modify(|generation| *generation += 1);
        self.call(|reply| EngineRequest::Exit { reply }).await
    }

    /// [`exit`](Self::exit) bounded by `grace`. The engine thread may be parked
    /// in a name prompt; the exit then stays queued and `Timeout` is returned.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        tokio::time::timeout(grace, self.exit())
            .await
            .map_err(|_| EngineError::Timeout(grace))?
    }

    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the orchestrator on a dedicated OS thread.
///
/// The thread runs a current-thread runtime: requests and detection ticks are
/// multiplexed by one `select!` loop and each runs to completion before the
/// next starts. A slow analysis delays the following tick. The camera is
/// released when every handle has been dropped.
pub fn spawn_engine<S, A, U>(
    config: &Config,
    source: S,
    analyzer: A,
    surface: U,
) -> Result<EngineHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
    U: Surface + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (stop_tx, stop_rx) = watch::channel(0u64);
    let mut orchestrator = Orchestrator::new(config, source, analyzer, surface, stop_rx);
    let tick_interval = config.tick_interval();

    std::thread::Builder::new()
        .name("glimpse-engine".into())
        .spawn(move || {
            tracing::info!(interval_ms = tick_interval.as_millis() as u64, "engine thread started");
            runtime.block_on(async move {
                orchestrator.set_status(READY_STATUS);
                let mut ticker = tokio::time::interval(tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        req = rx.recv() => match req {
                            Some(req) => orchestrator.handle(req).await,
                            None => break,
                        },
                        _ = ticker.tick() => {
                            orchestrator.tick().await;
                        }
                    }
                }
                orchestrator.shutdown();
            });
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        stop_tx: Arc::new(stop_tx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_core::{BoundingBox, Descriptor, FaceLandmarks, Point, DESCRIPTOR_DIM};
    use glimpse_hw::Frame;
    use std::collections::VecDeque;

    enum Step {
        Face(Detection),
        NoFace,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct FakeSource {
        deny: bool,
        open: bool,
        releases: usize,
    }

    impl FrameSource for FakeSource {
        fn open(&mut self) -> Result<(), CameraError> {
            if self.deny {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
            self.open = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn capture(&mut self) -> Result<Frame, CameraError> {
            if !self.open {
                return Err(CameraError::NotOpen);
            }
            Ok(Frame {
                data: vec![128; 4 * 2 * 3],
                width: 4,
                height: 2,
                timestamp: std::time::Instant::now(),
                sequence: 0,
                is_dark: false,
            })
        }

        fn release(&mut self) {
            self.open = false;
            self.releases += 1;
        }
    }

    #[derive(Default)]
    struct FakeAnalyzer {
        script: VecDeque<Step>,
        calls: usize,
        /// Signalled when a `Step::Hang` request starts.
        hung: Arc<tokio::sync::Notify>,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        async fn analyze(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Option<Detection>, AnalyzerError> {
            self.calls += 1;
            match self.script.pop_front() {
                Some(Step::Face(det)) => Ok(Some(det)),
                Some(Step::NoFace) | None => Ok(None),
                Some(Step::Fail) => Err(AnalyzerError::RequestFailed("service gone".into())),
                Some(Step::Hang) => {
                    self.hung.notify_one();
                    std::future::pending::<Result<Option<Detection>, AnalyzerError>>().await
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        statuses: Vec<String>,
        enrolled: Vec<Vec<String>>,
        recognized: Vec<Vec<String>>,
        overlays: Vec<Option<Overlay>>,
    }

    impl Surface for RecordingSurface {
        fn status_changed(&mut self, status: &str) {
            self.statuses.push(status.to_string());
        }

        fn enrolled_changed(&mut self, labels: &[String]) {
            self.enrolled.push(labels.to_vec());
        }

        fn recognized_changed(&mut self, entries: &[String]) {
            self.recognized.push(entries.to_vec());
        }

        fn overlay_changed(&mut self, overlay: Option<&Overlay>) {
            self.overlays.push(overlay.cloned());
        }
    }

    struct FixedPrompt {
        answer: Option<String>,
        asked: bool,
    }

    impl FixedPrompt {
        fn new(answer: Option<&str>) -> Self {
            Self { answer: answer.map(String::from), asked: false }
        }
    }

    /// Parks the engine thread in `ask` until released, like a user who never answers.
    struct ParkedPrompt {
        entered: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl NamePrompt for ParkedPrompt {
        fn ask(&mut self, _message: &str) -> Option<String> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            None
        }
    }

    impl NamePrompt for FixedPrompt {
        fn ask(&mut self, _message: &str) -> Option<String> {
            self.asked = true;
            self.answer.clone()
        }
    }

    type TestOrchestrator = Orchestrator<FakeSource, FakeAnalyzer, RecordingSurface>;

    fn eye(cx: f32, half_open: f32) -> [Point; 6] {
        [
            Point::new(cx - 15.0, 50.0),
            Point::new(cx - 5.0, 50.0 - half_open),
            Point::new(cx + 5.0, 50.0 - half_open),
            Point::new(cx + 15.0, 50.0),
            Point::new(cx + 5.0, 50.0 + half_open),
            Point::new(cx - 5.0, 50.0 + half_open),
        ]
    }

    /// Face with eyes `half_open` px open, nose tip at `nose_x`, descriptor filled with `seed`.
    fn face(half_open: f32, nose_x: f32, seed: f32) -> Step {
        Step::Face(Detection {
            bbox: BoundingBox { x: 40.0, y: 20.0, width: 140.0, height: 160.0, confidence: 0.95 },
            landmarks: FaceLandmarks {
                left_eye: Some(eye(80.0, half_open)),
                right_eye: Some(eye(140.0, half_open)),
                nose: (0..9).map(|i| Point::new(nose_x, 60.0 + i as f32 * 5.0)).collect(),
                ..Default::default()
            },
            descriptor: Descriptor { values: vec![seed; DESCRIPTOR_DIM] },
        })
    }

    fn orchestrator(steps: Vec<Step>) -> (TestOrchestrator, watch::Sender<u64>) {
        let (stop_tx, stop_rx) = watch::channel(0u64);
        let analyzer = FakeAnalyzer { script: steps.into(), ..Default::default() };
        let orch = Orchestrator::new(
            &Config::default(),
            FakeSource::default(),
            analyzer,
            RecordingSurface::default(),
            stop_rx,
        );
        (orch, stop_tx)
    }

    /// Baseline, blink, then head turn: three ticks that pass liveness.
    fn liveness_steps() -> Vec<Step> {
        vec![face(5.0, 100.0, 0.0), face(0.5, 100.0, 0.0), face(5.0, 130.0, 0.0)]
    }

    async fn run_ticks(orch: &mut TestOrchestrator, n: usize) {
        for _ in 0..n {
            orch.tick().await;
        }
    }

    #[tokio::test]
    async fn test_enroll_success() {
        let (mut orch, _stop) = orchestrator(vec![face(5.0, 100.0, 0.1)]);
        let mut prompt = FixedPrompt::new(Some("  Alice "));

        let result = orch.enroll(&mut prompt).await.unwrap();

        assert_eq!(result.label, "Alice");
        assert_eq!(result.count, 1);
        assert!(orch.running);
        assert_eq!(orch.surface.enrolled, vec![vec!["Alice".to_string()]]);
        assert_eq!(orch.status, "Face enrolled for Alice.");
    }

    #[tokio::test]
    async fn test_enroll_no_face() {
        let (mut orch, _stop) = orchestrator(vec![Step::NoFace]);
        let mut prompt = FixedPrompt::new(Some("Alice"));

        let err = orch.enroll(&mut prompt).await.unwrap_err();

        assert!(matches!(err, EngineError::NoFaceDetected));
        assert!(!prompt.asked);
        assert!(orch.gallery.is_empty());
        assert_eq!(orch.status, "Face not detected.");
    }

    #[tokio::test]
    async fn test_enroll_blank_name_discards_descriptor() {
        for answer in [None, Some(""), Some("   ")] {
            let (mut orch, _stop) = orchestrator(vec![face(5.0, 100.0, 0.1)]);
            let mut prompt = FixedPrompt::new(answer);

            let err = orch.enroll(&mut prompt).await.unwrap_err();

            assert!(matches!(err, EngineError::EmptyName));
            assert!(prompt.asked);
            assert!(orch.gallery.is_empty());
            assert!(orch.surface.enrolled.is_empty());
            assert_eq!(orch.status, "Enrollment cancelled. Name is required.");
        }
    }

    #[tokio::test]
    async fn test_enroll_camera_denied() {
        let (mut orch, _stop) = orchestrator(vec![face(5.0, 100.0, 0.1)]);
        orch.source.deny = true;
        let mut prompt = FixedPrompt::new(Some("Alice"));

        let err = orch.enroll(&mut prompt).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::CameraUnavailable(CameraError::PermissionDenied(_))
        ));
        assert!(!orch.running);
        assert_eq!(orch.analyzer.calls, 0);
        assert!(orch.status.starts_with("Camera unavailable"));
    }

    #[tokio::test]
    async fn test_enroll_analysis_failure() {
        let (mut orch, _stop) = orchestrator(vec![Step::Fail]);
        let mut prompt = FixedPrompt::new(Some("Alice"));

        let err = orch.enroll(&mut prompt).await.unwrap_err();

        assert!(matches!(err, EngineError::Analyzer(_)));
        assert!(!prompt.asked);
        assert!(orch.gallery.is_empty());
    }

    #[tokio::test]
    async fn test_recognize_refused_before_liveness() {
        let (mut orch, _stop) = orchestrator(vec![face(5.0, 100.0, 0.1)]);
        orch.enroll(&mut FixedPrompt::new(Some("Alice"))).await.unwrap();
        assert_eq!(orch.status().enrolled, vec!["Alice"]);

        let err = orch.recognize().unwrap_err();

        assert!(matches!(err, EngineError::LivenessNotPassed));
        assert!(!orch.session.recognition.recognizing);
        assert_eq!(orch.status, "Liveness check failed. Blink and move your head.");
    }

    #[tokio::test]
    async fn test_ticks_pass_liveness() {
        let (mut orch, _stop) = orchestrator(liveness_steps());
        orch.start_stream().unwrap();

        assert_eq!(orch.tick().await, TickOutcome::Face);
        assert!(!orch.session.liveness.passed());
        run_ticks(&mut orch, 2).await;

        assert!(orch.session.liveness.passed());
        assert_eq!(
            orch.surface.statuses,
            vec![
                "Blink detected.",
                "Blink detected. Head movement detected.",
                "Liveness confirmed (blink + head movement)",
            ]
        );
    }

    #[tokio::test]
    async fn test_tick_idle_when_stopped() {
        let (mut orch, _stop) = orchestrator(liveness_steps());

        assert_eq!(orch.tick().await, TickOutcome::Idle);
        assert_eq!(orch.analyzer.calls, 0);
    }

    #[tokio::test]
    async fn test_tick_without_face_clears_overlay() {
        let (mut orch, _stop) = orchestrator(vec![face(5.0, 100.0, 0.0), Step::NoFace]);
        orch.start_stream().unwrap();

        orch.tick().await;
        assert!(matches!(orch.surface.overlays.last(), Some(Some(_))));
        assert_eq!(orch.tick().await, TickOutcome::NoFace);
        assert!(matches!(orch.surface.overlays.last(), Some(None)));
    }

    #[tokio::test]
    async fn test_tick_analysis_failure_is_skipped() {
        let (mut orch, _stop) = orchestrator(vec![Step::Fail]);
        orch.start_stream().unwrap();

        assert_eq!(orch.tick().await, TickOutcome::Failed);
        assert!(orch.running);
        assert!(orch.surface.overlays.is_empty());
    }

    #[tokio::test]
    async fn test_recognition_flow_and_dedup() {
        let mut steps = vec![face(5.0, 100.0, 0.1)];
        steps.extend(liveness_steps());
        steps.push(face(5.0, 130.0, 0.1));
        steps.push(face(5.0, 130.0, 0.1));
        let (mut orch, _stop) = orchestrator(steps);

        orch.enroll(&mut FixedPrompt::new(Some("Alice"))).await.unwrap();
        run_ticks(&mut orch, 3).await;
        orch.recognize().unwrap();
        run_ticks(&mut orch, 2).await;

        assert_eq!(
            orch.status,
            "Recognized: Alice | Features used: Left Eye, Right Eye, Nose"
        );
        // Two matches within the window produce one log entry.
        assert_eq!(orch.log.len(), 1);
        assert_eq!(orch.surface.recognized.len(), 1);
        assert!(orch.surface.recognized[0][0].starts_with("Alice ("));
        let overlay = orch.surface.overlays.last().cloned().flatten().unwrap();
        assert_eq!(overlay.label.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_recognition_unknown_face() {
        let mut steps = vec![face(5.0, 100.0, 0.1)];
        steps.extend(liveness_steps());
        steps.push(face(5.0, 130.0, 0.9));
        let (mut orch, _stop) = orchestrator(steps);

        orch.enroll(&mut FixedPrompt::new(Some("Alice"))).await.unwrap();
        run_ticks(&mut orch, 3).await;
        orch.recognize().unwrap();
        orch.tick().await;

        assert!(orch.status.starts_with("Recognized: unknown"));
        assert_eq!(orch.log.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_recognizing_without_gallery_does_nothing() {
        let mut steps = liveness_steps();
        steps.push(face(5.0, 130.0, 0.1));
        let (mut orch, _stop) = orchestrator(steps);
        orch.start_stream().unwrap();
        run_ticks(&mut orch, 3).await;
        orch.recognize().unwrap();

        orch.tick().await;

        assert!(orch.session.recognition.recognizing);
        assert!(orch.log.is_empty());
        assert_eq!(orch.status, "Liveness confirmed (blink + head movement)");
    }

    #[tokio::test]
    async fn test_stop_resets_session() {
        let mut steps = liveness_steps();
        steps.extend(vec![face(5.0, 100.0, 0.0), face(5.0, 130.0, 0.0)]);
        let (mut orch, _stop) = orchestrator(steps);
        orch.start_stream().unwrap();
        run_ticks(&mut orch, 3).await;
        orch.recognize().unwrap();

        orch.stop_stream();

        assert!(!orch.running);
        assert_eq!(orch.source.releases, 1);
        assert_eq!(orch.session, SessionState::default());
        assert_eq!(orch.status, "Camera stopped.");
        assert!(matches!(orch.surface.overlays.last(), Some(None)));

        // A fresh stream starts from scratch: baseline is re-captured, nothing carries over.
        orch.start_stream().unwrap();
        run_ticks(&mut orch, 2).await;
        assert!(orch.session.liveness.head_moved());
        assert!(!orch.session.liveness.passed());
        assert!(matches!(orch.recognize(), Err(EngineError::LivenessNotPassed)));
    }

    #[tokio::test]
    async fn test_stop_mid_request_discards_result() {
        let (mut orch, stop_tx) = orchestrator(vec![Step::Hang]);
        orch.start_stream().unwrap();

        let stop = async {
            tokio::task::yield_now().await;
            stop_tx.send_modify(|generation| *generation += 1);
        };
        let (outcome, ()) = tokio::join!(orch.tick(), stop);

        assert_eq!(outcome, TickOutcome::Cancelled);
        assert!(orch.surface.overlays.is_empty());
        assert_eq!(orch.session, SessionState::default());
    }

    #[tokio::test]
    async fn test_earlier_stop_does_not_cancel_next_tick() {
        let (mut orch, stop_tx) = orchestrator(vec![face(5.0, 100.0, 0.0)]);
        stop_tx.send_modify(|generation| *generation += 1);
        orch.start_stream().unwrap();

        assert_eq!(orch.tick().await, TickOutcome::Face);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let config = Config {
            tick_interval_ms: 10,
            ..Config::default()
        };
        let analyzer = FakeAnalyzer {
            script: vec![face(5.0, 100.0, 0.1)].into(),
            ..Default::default()
        };
        let handle = spawn_engine(
            &config,
            FakeSource::default(),
            analyzer,
            RecordingSurface::default(),
        )
        .unwrap();

        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.status, READY_STATUS);

        assert!(matches!(
            handle.recognize().await,
            Err(EngineError::LivenessNotPassed)
        ));

        let result = handle
            .enroll(Box::new(FixedPrompt::new(Some("Bob"))))
            .await
            .unwrap();
        assert_eq!(result.label, "Bob");

        let status = handle.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.enrolled, vec!["Bob"]);

        handle.exit().await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert!(!status.liveness_passed);
        assert_eq!(status.status, "Camera stopped.");
        assert_eq!(status.enrolled, vec!["Bob"]);
    }

    fn fast_config() -> Config {
        Config {
            tick_interval_ms: 10,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_handle_exit_cancels_in_flight_analysis() {
        let analyzer = FakeAnalyzer {
            script: vec![face(5.0, 100.0, 0.1), Step::Hang].into(),
            ..Default::default()
        };
        let hung = analyzer.hung.clone();
        let handle = spawn_engine(
            &fast_config(),
            FakeSource::default(),
            analyzer,
            RecordingSurface::default(),
        )
        .unwrap();

        handle
            .enroll(Box::new(FixedPrompt::new(Some("Alice"))))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), hung.notified())
            .await
            .expect("tick never reached the analyzer");

        // The engine loop is parked inside the tick; only the generation bump frees it.
        tokio::time::timeout(Duration::from_secs(2), handle.exit())
            .await
            .expect("exit blocked behind the in-flight analysis")
            .unwrap();

        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.status, "Camera stopped.");
        assert_eq!(status.enrolled, vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_shutdown_bounded_while_prompt_open() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let analyzer = FakeAnalyzer {
            script: vec![face(5.0, 100.0, 0.1)].into(),
            ..Default::default()
        };
        let handle = spawn_engine(
            &fast_config(),
            FakeSource::default(),
            analyzer,
            RecordingSurface::default(),
        )
        .unwrap();

        let enroll = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .enroll(Box::new(ParkedPrompt { entered: entered_tx, release: release_rx }))
                    .await
            }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .expect("prompt never opened");

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            handle.shutdown(Duration::from_millis(100)),
        )
        .await
        .expect("shutdown hung");
        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        // The queued exit still runs once the prompt returns.
        release_tx.send(()).unwrap();
        assert!(matches!(enroll.await.unwrap(), Err(EngineError::EmptyName)));
        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.status, "Camera stopped.");
    }
}
