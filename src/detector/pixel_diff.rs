//! Built-in pixel-diff backends
//!
//! Both backends compare the current frame against the previous one at the
//! analysis resolution and report a region when the changed-pixel ratio
//! crosses a threshold. `intrusion` restricts the comparison to the camera's
//! configured zone.

use super::{analysis_size, Detection, Detector};
use crate::config_store::Rect;
use crate::error::Result;
use crate::gpu_admission::ExecMode;
use crate::imaging::{resize_nearest, Frame};

/// Luma difference above which a pixel counts as changed
const PIXEL_DELTA_THRESHOLD: i16 = 30;
/// Changed-pixel ratio above which a detection is emitted
const CHANGED_RATIO_THRESHOLD: f32 = 0.05;

/// Whole-frame motion backend
pub struct MotionDetector {
    zone: Option<Rect>,
    prev_luma: Option<(u32, u32, Vec<u8>)>,
}

impl MotionDetector {
    pub fn new(zone: Option<Rect>) -> Self {
        Self {
            zone,
            prev_luma: None,
        }
    }
}

impl Detector for MotionDetector {
    fn kind(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame, mode: ExecMode) -> Result<Vec<Detection>> {
        diff_detect(
            frame,
            mode,
            self.zone,
            &mut self.prev_luma,
            "motion",
        )
    }
}

/// Zone-restricted intrusion backend.
///
/// Without a configured zone the whole frame is the zone.
pub struct IntrusionDetector {
    zone: Option<Rect>,
    prev_luma: Option<(u32, u32, Vec<u8>)>,
}

impl IntrusionDetector {
    pub fn new(zone: Option<Rect>) -> Self {
        Self {
            zone,
            prev_luma: None,
        }
    }
}

impl Detector for IntrusionDetector {
    fn kind(&self) -> &'static str {
        "intrusion"
    }

    fn detect(&mut self, frame: &Frame, mode: ExecMode) -> Result<Vec<Detection>> {
        diff_detect(
            frame,
            mode,
            self.zone,
            &mut self.prev_luma,
            "intrusion",
        )
    }
}

/// Shared diff pass for both backends
fn diff_detect(
    frame: &Frame,
    mode: ExecMode,
    zone: Option<Rect>,
    prev_luma: &mut Option<(u32, u32, Vec<u8>)>,
    label: &str,
) -> Result<Vec<Detection>> {
    let (aw, ah) = analysis_size(mode);
    let small = resize_nearest(frame, aw, ah);
    let luma = to_luma(&small);

    // Zone scaled into analysis coordinates; whole frame when unset
    let zone_small = zone
        .map(|z| scale_rect(&z, frame.width, frame.height, aw, ah))
        .unwrap_or(Rect {
            x: 0,
            y: 0,
            width: aw,
            height: ah,
        });

    let result = match prev_luma.take() {
        Some((pw, ph, prev)) if pw == aw && ph == ah => {
            let (changed, total, bounds) = diff_zone(&prev, &luma, aw, &zone_small);
            if total > 0 && (changed as f32 / total as f32) > CHANGED_RATIO_THRESHOLD {
                let ratio = changed as f32 / total as f32;
                let bbox = bounds
                    .map(|b| scale_rect(&b, aw, ah, frame.width, frame.height))
                    .unwrap_or(zone.unwrap_or(Rect {
                        x: 0,
                        y: 0,
                        width: frame.width,
                        height: frame.height,
                    }));
                vec![Detection {
                    bbox,
                    class_label: label.to_string(),
                    confidence: ratio.min(1.0),
                }]
            } else {
                Vec::new()
            }
        }
        // First frame after start or a mode change: nothing to compare against
        _ => Vec::new(),
    };

    *prev_luma = Some((aw, ah, luma));
    Ok(result)
}

fn to_luma(frame: &Frame) -> Vec<u8> {
    frame
        .data
        .chunks_exact(3)
        .map(|px| {
            // BGR weights, integer approximation
            ((px[0] as u32 * 29 + px[1] as u32 * 150 + px[2] as u32 * 77) >> 8) as u8
        })
        .collect()
}

/// Count changed pixels inside the zone and track their bounding box
fn diff_zone(
    prev: &[u8],
    curr: &[u8],
    width: u32,
    zone: &Rect,
) -> (usize, usize, Option<Rect>) {
    let mut changed = 0usize;
    let mut total = 0usize;
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;

    let x_end = zone.x + zone.width;
    let y_end = zone.y + zone.height;
    let height = (curr.len() as u32) / width;

    for y in zone.y..y_end.min(height) {
        for x in zone.x..x_end.min(width) {
            let i = (y * width + x) as usize;
            total += 1;
            let delta = (prev[i] as i16 - curr[i] as i16).abs();
            if delta > PIXEL_DELTA_THRESHOLD {
                changed += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    let bounds = if changed > 0 {
        Some(Rect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    } else {
        None
    };
    (changed, total, bounds)
}

fn scale_rect(rect: &Rect, from_w: u32, from_h: u32, to_w: u32, to_h: u32) -> Rect {
    Rect {
        x: (rect.x as u64 * to_w as u64 / from_w.max(1) as u64) as u32,
        y: (rect.y as u64 * to_h as u64 / from_h.max(1) as u64) as u32,
        width: ((rect.width as u64 * to_w as u64 / from_w.max(1) as u64) as u32).max(1),
        height: ((rect.height as u64 * to_h as u64 / from_h.max(1) as u64) as u32).max(1),
    }
}
