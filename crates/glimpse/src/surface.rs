//! User-facing surface: status line, enrolled and recognized lists, overlay.

use std::path::PathBuf;

use crate::overlay::Overlay;

/// Sink for everything the orchestrator shows the user.
pub trait Surface {
    fn status_changed(&mut self, status: &str);
    fn enrolled_changed(&mut self, labels: &[String]);
    fn recognized_changed(&mut self, entries: &[String]);
    /// `None` clears the overlay.
    fn overlay_changed(&mut self, overlay: Option<&Overlay>);
}

/// Terminal surface: prints changes to stdout and optionally writes the overlay as a PNG.
pub struct ConsoleSurface {
    overlay_path: Option<PathBuf>,
    last_status: String,
    overlay_visible: bool,
}

impl ConsoleSurface {
    pub fn new(overlay_path: Option<PathBuf>) -> Self {
        Self {
            overlay_path,
            last_status: String::new(),
            overlay_visible: false,
        }
    }

    fn write_overlay(&self, overlay: &Overlay) {
        let Some(path) = &self.overlay_path else {
            return;
        };
        if let Err(e) = overlay.save(path) {
            tracing::warn!(path = %path.display(), error = %e, "overlay write failed");
        }
    }

    fn clear_overlay(&self) {
        if let Some(path) = &self.overlay_path {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "overlay clear failed");
                }
            }
        }
    }
}

impl Surface for ConsoleSurface {
    fn status_changed(&mut self, status: &str) {
        // The recognition status is re-reported every tick; print it once.
        if status == self.last_status {
            return;
        }
        self.last_status = status.to_string();
        println!("[status] {status}");
    }

    fn enrolled_changed(&mut self, labels: &[String]) {
        println!("[enrolled] {}", labels.join(", "));
    }

    fn recognized_changed(&mut self, entries: &[String]) {
        println!("[recognized]");
        for entry in entries {
            println!("  {entry}");
        }
    }

    fn overlay_changed(&mut self, overlay: Option<&Overlay>) {
        match overlay {
            Some(overlay) => {
                self.write_overlay(overlay);
                self.overlay_visible = true;
            }
            None if self.overlay_visible => {
                self.clear_overlay();
                self.overlay_visible = false;
            }
            None => {}
        }
    }
}
