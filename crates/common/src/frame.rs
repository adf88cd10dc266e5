//! Frames exchanged between the capture and detection stages.

use chrono::{DateTime, Utc};
use image::RgbImage;

/// A captured video frame in packed RGB8 order.
///
/// The pixel buffer is owned; detection annotates it in place and the
/// worker then freezes it inside a published result.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel data (`width * height * 3` bytes, row-major, RGB).
    pub image: RgbImage,

    /// Wall-clock time the frame was pulled from the device.
    pub captured_at: DateTime<Utc>,

    /// Device index the frame came from.
    pub camera_index: u32,
}

impl Frame {
    /// Wrap an image captured just now from `camera_index`.
    pub fn new(image: RgbImage, camera_index: u32) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
            camera_index,
        }
    }

    /// Build a frame from a raw RGB byte buffer.
    ///
    /// Returns `None` when the buffer length does not match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, camera_index: u32) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, camera_index))
    }

    /// A frame filled with one color. Handy for tests and probes.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], camera_index: u32) -> Self {
        Self::new(
            RgbImage::from_pixel(width, height, image::Rgb(rgb)),
            camera_index,
        )
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Whether the frame carries any pixels at all.
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
