//! Raw-frame primitives
//!
//! ## Responsibilities
//!
//! - BGR24 frame container shared by capture, detection and egress
//! - Nearest-neighbour resize to the encoder's fixed input shape
//! - Detection-box annotation drawn in place
//! - JPEG thumbnail encoding for evidence events

use crate::config_store::Rect;
use crate::error::{Error, Result};
use image::ImageEncoder;

/// One decoded video frame, packed BGR24
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Exactly width * height * 3 bytes
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap raw BGR24 bytes, checking the byte count
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "Frame byte count mismatch: got {} expected {} ({}x{})",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Solid-color frame (test fixtures and startup placeholders)
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Pixel at (x, y), BGR order
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Nearest-neighbour resize.
///
/// The egress encoder declares one fixed input shape; every written frame must
/// match it exactly or the pipe desynchronizes.
pub fn resize_nearest(frame: &Frame, width: u32, height: u32) -> Frame {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }
    let mut data = vec![0u8; width as usize * height as usize * 3];
    for y in 0..height {
        let src_y = (y as u64 * frame.height as u64 / height as u64) as usize;
        for x in 0..width {
            let src_x = (x as u64 * frame.width as u64 / width as u64) as usize;
            let src = (src_y * frame.width as usize + src_x) * 3;
            let dst = (y as usize * width as usize + x as usize) * 3;
            data[dst..dst + 3].copy_from_slice(&frame.data[src..src + 3]);
        }
    }
    Frame {
        width,
        height,
        data,
    }
}

/// Draw a 2px rectangle outline in place, clipped to the frame
pub fn draw_rect(frame: &mut Frame, rect: &Rect, bgr: [u8; 3]) {
    let x1 = rect.x.min(frame.width.saturating_sub(1));
    let y1 = rect.y.min(frame.height.saturating_sub(1));
    let x2 = (rect.x + rect.width).min(frame.width.saturating_sub(1));
    let y2 = (rect.y + rect.height).min(frame.height.saturating_sub(1));

    for t in 0..2u32 {
        for x in x1..=x2 {
            set_pixel(frame, x, (y1 + t).min(y2), bgr);
            set_pixel(frame, x, y2.saturating_sub(t).max(y1), bgr);
        }
        for y in y1..=y2 {
            set_pixel(frame, (x1 + t).min(x2), y, bgr);
            set_pixel(frame, x2.saturating_sub(t).max(x1), y, bgr);
        }
    }
}

fn set_pixel(frame: &mut Frame, x: u32, y: u32, bgr: [u8; 3]) {
    if x >= frame.width || y >= frame.height {
        return;
    }
    let i = (y as usize * frame.width as usize + x as usize) * 3;
    frame.data[i..i + 3].copy_from_slice(&bgr);
}

/// Encode a frame as a JPEG thumbnail (longest side capped at 320px)
pub fn encode_thumbnail(frame: &Frame) -> Result<Vec<u8>> {
    let scale = 320.0 / frame.width.max(frame.height) as f64;
    let thumb = if scale < 1.0 {
        resize_nearest(
            frame,
            ((frame.width as f64 * scale) as u32).max(1),
            ((frame.height as f64 * scale) as u32).max(1),
        )
    } else {
        frame.clone()
    };

    // image expects RGB order
    let mut rgb = Vec::with_capacity(thumb.data.len());
    for px in thumb.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80);
    encoder
        .write_image(
            &rgb,
            thumb.width,
            thumb.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| Error::Internal(format!("Thumbnail encode failed: {}", e)))?;
    Ok(out)
}
