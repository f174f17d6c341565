//! Per-session state: liveness flags, recognition de-duplication, the
//! enrolled-face gallery and the recent-recognitions log.

use crate::liveness::LivenessState;
use crate::types::{Descriptor, EnrolledFace};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Window within which repeated recognitions of the same label are not logged again.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Number of recent recognitions kept for display.
pub const DEFAULT_LOG_CAPACITY: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GalleryError {
    #[error("name required")]
    EmptyName,
}

/// Recognition toggle and the last label written to the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionState {
    pub recognizing: bool,
    last_label: Option<String>,
    last_at: Option<Instant>,
}

impl RecognitionState {
    pub fn last_label(&self) -> Option<&str> {
        self.last_label.as_deref()
    }

    /// Decide whether a match should be logged, remembering it if so.
    ///
    /// A match is logged when its label differs from the last logged label or
    /// when strictly more than `window` has passed since that entry.
    pub fn should_record(&mut self, label: &str, now: Instant, window: Duration) -> bool {
        let is_new_label = self.last_label.as_deref() != Some(label);
        let window_elapsed = match self.last_at {
            Some(last) => now.saturating_duration_since(last) > window,
            None => true,
        };
        if !(is_new_label || window_elapsed) {
            return false;
        }
        self.last_label = Some(label.to_string());
        self.last_at = Some(now);
        true
    }
}

/// All mutable per-stream state, owned by the orchestrator.
///
/// Stopping the stream replaces the whole value with [`SessionState::default`];
/// a liveness pass never carries over into the next stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub liveness: LivenessState,
    pub recognition: RecognitionState,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Recognition has an effect only once liveness has passed.
    pub fn recognition_active(&self) -> bool {
        self.recognition.recognizing && self.liveness.passed()
    }
}

/// Append-only collection of enrolled faces.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    faces: Vec<EnrolledFace>,
}

impl Gallery {
    /// Enroll a descriptor under a trimmed, non-empty name. Duplicate names are allowed.
    pub fn enroll(
        &mut self,
        name: &str,
        descriptor: Descriptor,
    ) -> Result<&EnrolledFace, GalleryError> {
        let label = name.trim();
        if label.is_empty() {
            return Err(GalleryError::EmptyName);
        }
        self.faces.push(EnrolledFace {
            label: label.to_string(),
            descriptor,
            enrolled_at: Local::now(),
        });
        tracing::debug!(label, count = self.faces.len(), "gallery: face appended");
        Ok(&self.faces[self.faces.len() - 1])
    }

    pub fn faces(&self) -> &[EnrolledFace] {
        &self.faces
    }

    pub fn labels(&self) -> Vec<String> {
        self.faces.iter().map(|f| f.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// One line of the recent-recognitions list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEntry {
    pub label: String,
    pub at: DateTime<Local>,
}

impl fmt::Display for RecognitionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.at.format("%H:%M:%S"))
    }
}

/// Bounded list of recent recognitions, oldest evicted first.
#[derive(Debug, Clone)]
pub struct RecognitionLog {
    entries: VecDeque<RecognitionEntry>,
    capacity: usize,
}

impl Default for RecognitionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl RecognitionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: RecognitionEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecognitionEntry> {
        self.entries.iter()
    }

    /// Entries rendered as `"label (HH:MM:SS)"`, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
