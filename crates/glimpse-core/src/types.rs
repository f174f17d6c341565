use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the descriptor produced by the face-analysis service.
pub const DESCRIPTOR_DIM: usize = 128;

/// Label reported when no enrolled face is close enough to the probe.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A landmark coordinate in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn scaled(self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
        }
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
}

/// Landmark groups of the 68-point scheme.
///
/// Groups the service could not regress are `None` or empty. Eyes are ordered
/// corner, top, top, corner, bottom, bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    #[serde(default)]
    pub left_eye: Option<[Point; 6]>,
    #[serde(default)]
    pub right_eye: Option<[Point; 6]>,
    #[serde(default)]
    pub nose: Vec<Point>,
    #[serde(default)]
    pub mouth: Vec<Point>,
    #[serde(default)]
    pub jaw_outline: Vec<Point>,
}

/// A landmark group reported as "used" during recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkRegion {
    LeftEye,
    RightEye,
    Nose,
    Mouth,
    Jawline,
}

impl fmt::Display for LandmarkRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LandmarkRegion::LeftEye => "Left Eye",
            LandmarkRegion::RightEye => "Right Eye",
            LandmarkRegion::Nose => "Nose",
            LandmarkRegion::Mouth => "Mouth",
            LandmarkRegion::Jawline => "Jawline",
        })
    }
}

impl FaceLandmarks {
    /// Tip of the nose: the fourth point of the nose bridge (point 30 of 68).
    pub fn nose_tip(&self) -> Option<Point> {
        self.nose.get(3).copied()
    }

    /// Landmark groups present in this result, in display order.
    pub fn regions(&self) -> Vec<LandmarkRegion> {
        let mut regions = Vec::with_capacity(5);
        if self.left_eye.is_some() {
            regions.push(LandmarkRegion::LeftEye);
        }
        if self.right_eye.is_some() {
            regions.push(LandmarkRegion::RightEye);
        }
        if !self.nose.is_empty() {
            regions.push(LandmarkRegion::Nose);
        }
        if !self.mouth.is_empty() {
            regions.push(LandmarkRegion::Mouth);
        }
        if !self.jaw_outline.is_empty() {
            regions.push(LandmarkRegion::Jawline);
        }
        regions
    }

    /// Every landmark point, for overlay drawing.
    pub fn points(&self) -> Vec<Point> {
        let eyes = self
            .left_eye
            .iter()
            .chain(self.right_eye.iter())
            .flat_map(|eye| eye.iter().copied());
        eyes.chain(self.nose.iter().copied())
            .chain(self.mouth.iter().copied())
            .chain(self.jaw_outline.iter().copied())
            .collect()
    }

    fn scaled(&self, sx: f32, sy: f32) -> Self {
        let scale_eye = |eye: &[Point; 6]| eye.map(|p| p.scaled(sx, sy));
        let scale_all =
            |pts: &[Point]| -> Vec<Point> { pts.iter().map(|p| p.scaled(sx, sy)).collect() };
        Self {
            left_eye: self.left_eye.as_ref().map(scale_eye),
            right_eye: self.right_eye.as_ref().map(scale_eye),
            nose: scale_all(&self.nose),
            mouth: scale_all(&self.mouth),
            jaw_outline: scale_all(&self.jaw_outline),
        }
    }
}

/// Face descriptor (128-dimensional embedding from the face-analysis service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame: box, landmarks and descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: FaceLandmarks,
    pub descriptor: Descriptor,
}

impl Detection {
    /// Rescale box and landmarks from the analysed frame size to the display size.
    ///
    /// The descriptor is resolution independent and is carried over unchanged.
    pub fn resized(&self, from: (u32, u32), to: (u32, u32)) -> Detection {
        if from == to || from.0 == 0 || from.1 == 0 {
            return self.clone();
        }
        let sx = to.0 as f32 / from.0 as f32;
        let sy = to.1 as f32 / from.1 as f32;
        Detection {
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
                confidence: self.bbox.confidence,
            },
            landmarks: self.landmarks.scaled(sx, sy),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Check the box and descriptor before the detection is drawn, matched or enrolled.
    pub fn validate(&self) -> Result<(), String> {
        let b = &self.bbox;
        if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite()) {
            return Err("bounding box contains NaN/Inf".to_string());
        }
        if b.width < 0.0 || b.height < 0.0 {
            return Err(format!("negative bounding box size {}x{}", b.width, b.height));
        }
        let len = self.descriptor.values.len();
        if len != DESCRIPTOR_DIM {
            return Err(format!("expected {DESCRIPTOR_DIM}-dim descriptor, got {len}"));
        }
        if self.descriptor.values.iter().any(|v| !v.is_finite()) {
            return Err("descriptor contains NaN/Inf".to_string());
        }
        Ok(())
    }
}

/// A named face captured during enrollment.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub label: String,
    pub descriptor: Descriptor,
    pub enrolled_at: DateTime<Local>,
}

/// Best match of a probe descriptor against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Label of the closest enrolled face, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Euclidean distance to the closest enrolled face (infinite for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// Strategy for comparing a probe descriptor against the enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[EnrolledFace]) -> MatchResult;
}

/// Nearest-descriptor matcher with a maximum Euclidean distance.
///
/// Visits every gallery entry and keeps the strictly smallest distance, so
/// duplicate labels and ties resolve to the earliest enrollment.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub distance_threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            distance_threshold: 0.6,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[EnrolledFace]) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&face.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= self.distance_threshold => MatchResult {
                label: gallery[idx].label.clone(),
                distance: best_dist,
            },
            _ => MatchResult {
                label: UNKNOWN_LABEL.to_string(),
                distance: best_dist,
            },
        }
    }
}
