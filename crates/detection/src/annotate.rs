//! Drawing detections onto frames.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use eduvision_common::error::{EduvisionError, EduvisionResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::model::Detection;

/// Box colors, picked by detection index. Purely cosmetic.
pub const PALETTE: [[u8; 3]; 6] = [
    [0, 255, 0],   // green
    [0, 0, 255],   // blue
    [255, 0, 0],   // red
    [0, 255, 255], // cyan
    [255, 0, 255], // magenta
    [255, 255, 0], // yellow
];

const BOX_THICKNESS: u32 = 2;
const LABEL_OFFSET: i32 = 10;
const LABEL_SCALE: f32 = 16.0;
const TAB_HEIGHT: u32 = 6;

/// Draws bounding boxes and confidence labels.
///
/// Label text needs a font; without one a confidence tab (a filled bar whose
/// width is proportional to the score) marks each box instead.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Annotator that draws boxes and confidence tabs only.
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Annotator that renders text labels with the given font.
    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font from disk.
    pub fn from_font_file(path: &Path) -> EduvisionResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            EduvisionError::config(format!("Failed to read font {}: {e}", path.display()))
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| {
            EduvisionError::config(format!("Invalid font {}: {e}", path.display()))
        })?;
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Color for the detection at `index` in the model's output.
    pub fn color_for(index: usize) -> Rgb<u8> {
        Rgb(PALETTE[index % PALETTE.len()])
    }

    /// Draw one detection. Boxes are clipped to the image; degenerate boxes are skipped.
    pub fn draw(&self, image: &mut RgbImage, detection: &Detection, index: usize) {
        let Some(rect) = clip_rect(image, detection) else {
            tracing::trace!(?detection, "Skipping box outside frame");
            return;
        };
        let color = Self::color_for(index);

        for inset in 0..BOX_THICKNESS {
            let w = rect.width().saturating_sub(2 * inset);
            let h = rect.height().saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let r = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(image, r, color);
        }

        match &self.font {
            Some(font) => {
                let label = format!("Person: {:.2}", detection.confidence);
                let y = (rect.top() - LABEL_OFFSET - LABEL_SCALE as i32).max(0);
                draw_text_mut(
                    image,
                    color,
                    rect.left(),
                    y,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &label,
                );
            }
            None => {
                let width = ((rect.width() as f32) * detection.confidence.clamp(0.0, 1.0)) as u32;
                let y = (rect.top() - TAB_HEIGHT as i32).max(0);
                if width > 0 {
                    draw_filled_rect_mut(
                        image,
                        Rect::at(rect.left(), y).of_size(width, TAB_HEIGHT),
                        color,
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.is_some())
            .finish()
    }
}

fn clip_rect(image: &RgbImage, detection: &Detection) -> Option<Rect> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x1 = detection.bbox.x1.clamp(0.0, w);
    let y1 = detection.bbox.y1.clamp(0.0, h);
    let x2 = detection.bbox.x2.clamp(0.0, w);
    let y2 = detection.bbox.y2.clamp(0.0, h);

    let width = (x2 - x1).round() as u32;
    let height = (y2 - y1).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Rect::at(x1.round() as i32, y1.round() as i32).of_size(width, height))
}
