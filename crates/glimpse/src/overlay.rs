//! Detection overlay: face box, landmark dots and best-match label, rendered with `imageproc`.

use ab_glyph::{FontRef, PxScale};
use glimpse_core::{BoundingBox, Detection, Point};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const BOX_COLOR: Rgba<u8> = Rgba([0, 160, 255, 255]);
const MATCH_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([255, 220, 0, 255]);
const BOX_THICKNESS: i32 = 2;
const DOT_RADIUS: i32 = 1;
const LABEL_SIZE: f32 = 16.0;
const LABEL_GAP: i32 = 2;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// What is drawn over the video for one tick, in display coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub width: u32,
    pub height: u32,
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    /// Best-match label while recognizing; drawn above a green box.
    pub label: Option<String>,
}

impl Overlay {
    /// Overlay for a detection already resized to `display`.
    pub fn from_detection(detection: &Detection, display: (u32, u32)) -> Self {
        Self {
            width: display.0,
            height: display.1,
            bbox: detection.bbox,
            landmarks: detection.landmarks.points(),
            label: None,
        }
    }

    /// Render onto a transparent canvas of the display size.
    pub fn render(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        let rect = clip_rect(&self.bbox, self.width, self.height);

        if let (Some(label), Some(rect)) = (&self.label, rect) {
            draw_label(&mut img, label, &rect);
        }

        let color = if self.label.is_some() { MATCH_COLOR } else { BOX_COLOR };
        if let Some(rect) = rect {
            for inset in 0..BOX_THICKNESS {
                let w = rect.width() as i32 - 2 * inset;
                let h = rect.height() as i32 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let inner = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut img, inner, color);
            }
        }

        for p in self.landmarks.iter().filter(|p| p.x.is_finite() && p.y.is_finite()) {
            let center = (p.x.round() as i32, p.y.round() as i32);
            draw_filled_circle_mut(&mut img, center, DOT_RADIUS, LANDMARK_COLOR);
        }
        img
    }

    pub fn save(&self, path: &Path) -> image::ImageResult<()> {
        self.render().save(path)
    }
}

/// Box in pixel coordinates, clamped to `BOX_THICKNESS` pixels beyond each
/// image edge. Off-canvas sides stay invisible and drawing cost is bounded by
/// the canvas size.
fn clip_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let coords = [bbox.x, bbox.y, bbox.x + bbox.width, bbox.y + bbox.height];
    if coords.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let margin = BOX_THICKNESS as f32;
    let clamp = |v: f32, max: u32| v.round().clamp(-margin, max as f32 + margin) as i32;
    let x0 = clamp(coords[0], width);
    let y0 = clamp(coords[1], height);
    let x1 = clamp(coords[2], width);
    let y1 = clamp(coords[3], height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// Label text just above the box, or along its top edge when there is no room.
fn draw_label(img: &mut RgbaImage, label: &str, rect: &Rect) {
    let font = match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => font,
        Err(e) => {
            tracing::warn!(error = %e, "overlay font unusable, label not drawn");
            return;
        }
    };
    let x = rect.left().max(0);
    let y = (rect.top() - LABEL_SIZE as i32 - LABEL_GAP).max(0);
    draw_text_mut(img, MATCH_COLOR, x, y, PxScale::from(LABEL_SIZE), &font, label);
}
