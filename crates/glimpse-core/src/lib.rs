//! glimpse-core: Liveness and enrollment logic for webcam face sessions.
//!
//! Detection, landmark regression and descriptor embedding are delegated to an
//! external face-analysis service behind [`FaceAnalyzer`]. This crate owns what
//! happens with the results: the eye-aspect-ratio blink check, the nose-tip
//! head-turn check, the enrolled-face gallery and nearest-descriptor matching.

pub mod analyzer;
pub mod liveness;
pub mod session;
pub mod types;

pub use analyzer::{decode_detection, AnalyzerError, FaceAnalyzer};
pub use liveness::{LivenessState, LivenessThresholds, LivenessUpdate};
pub use session::{
    Gallery, GalleryError, RecognitionEntry, RecognitionLog, RecognitionState, SessionState,
};
pub use types::{
    BoundingBox, Descriptor, Detection, EnrolledFace, EuclideanMatcher, FaceLandmarks,
    LandmarkRegion, MatchResult, Matcher, Point, DESCRIPTOR_DIM, UNKNOWN_LABEL,
};
