//! Active liveness detection: one blink plus one head turn.
//!
//! A printed photograph held up to the camera neither closes its eyes nor
//! turns. Each detection tick feeds the regressed landmarks into two
//! independent heuristics:
//!
//! - **Blink**: the eye aspect ratio (EAR) of both eyes drops below a
//!   threshold at least once.
//! - **Head turn**: the nose tip moves horizontally away from the position it
//!   held on the first observed frame by more than a pixel threshold.
//!
//! Both flags are sticky; liveness passes once both have fired, in any order.
//! Neither threshold is calibrated per user or per camera.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Static photographs, printed or on a still screen.
//! - **Does not block:** Video replay, animated masks.

use crate::types::{FaceLandmarks, Point};

/// EAR below which the eyes are considered closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.25;

/// Horizontal nose-tip displacement, in landmark pixels, that counts as a head turn.
pub const DEFAULT_HEAD_MOVE_THRESHOLD: f32 = 20.0;

/// Corner distances below this are treated as a degenerate eye.
const MIN_EYE_WIDTH: f32 = 1e-6;

/// Thresholds for the two liveness heuristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessThresholds {
    pub ear_threshold: f32,
    pub head_move_threshold: f32,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            head_move_threshold: DEFAULT_HEAD_MOVE_THRESHOLD,
        }
    }
}

/// Aspect ratio of a single 6-point eye: opening height over corner width.
///
/// Returns `None` when the two corners coincide.
pub fn single_eye_ratio(eye: &[Point; 6]) -> Option<f32> {
    let width = eye[0].distance(&eye[3]);
    if width < MIN_EYE_WIDTH {
        return None;
    }
    let v1 = eye[1].distance(&eye[5]);
    let v2 = eye[2].distance(&eye[4]);
    Some((v1 + v2) / (2.0 * width))
}

/// Mean eye aspect ratio of both eyes.
pub fn eye_aspect_ratio(eye1: &[Point; 6], eye2: &[Point; 6]) -> Option<f32> {
    let a = single_eye_ratio(eye1)?;
    let b = single_eye_ratio(eye2)?;
    Some((a + b) / 2.0)
}

/// What changed during one [`LivenessState::observe`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LivenessUpdate {
    /// EAR of this frame, if both eyes were present and well formed.
    pub ear: Option<f32>,
    /// The blink flag fired on this frame.
    pub blink_detected: bool,
    /// The head-turn flag fired on this frame.
    pub head_move_detected: bool,
    /// Liveness passed on this frame (both flags now set, previously not).
    pub passed: bool,
}

/// Sticky blink/head-turn flags for one camera session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessState {
    blinked: bool,
    head_moved: bool,
    initial_nose_x: Option<f32>,
}

impl LivenessState {
    pub fn blinked(&self) -> bool {
        self.blinked
    }

    pub fn head_moved(&self) -> bool {
        self.head_moved
    }

    /// Baseline nose-tip x captured from the first observed frame.
    pub fn initial_nose_x(&self) -> Option<f32> {
        self.initial_nose_x
    }

    /// Both heuristics have fired since the last reset.
    pub fn passed(&self) -> bool {
        self.blinked && self.head_moved
    }

    /// Feed one frame's landmarks into both heuristics.
    pub fn observe(
        &mut self,
        landmarks: &FaceLandmarks,
        thresholds: &LivenessThresholds,
    ) -> LivenessUpdate {
        let was_passed = self.passed();
        let mut update = LivenessUpdate::default();

        if let (Some(left), Some(right)) = (&landmarks.left_eye, &landmarks.right_eye) {
            update.ear = eye_aspect_ratio(left, right);
        }
        if let Some(ear) = update.ear {
            if ear < thresholds.ear_threshold && !self.blinked {
                self.blinked = true;
                update.blink_detected = true;
            }
        }

        if let Some(nose) = landmarks.nose_tip() {
            match self.initial_nose_x {
                None => self.initial_nose_x = Some(nose.x),
                Some(baseline) => {
                    if !self.head_moved && (nose.x - baseline).abs() > thresholds.head_move_threshold
                    {
                        self.head_moved = true;
                        update.head_move_detected = true;
                    }
                }
            }
        }

        update.passed = !was_passed && self.passed();
        update
    }
}
