//! Core frame, geometry and verdict types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single raw video frame in packed RGB24 layout.
///
/// Frames are ephemeral: the pipeline derives everything it needs each tick
/// and never holds on to pixel data between ticks.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    /// RGB triple at pixel coordinates, clamped to frame bounds.
    #[inline]
    pub fn rgb_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let idx = ((y * self.width + x) * 3) as usize;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Luma at pixel coordinates using ITU-R BT.601 weights, range 0-255.
    #[inline]
    pub fn luma601_at(&self, x: u32, y: u32) -> f32 {
        let (r, g, b) = self.rgb_at(x, y);
        0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
    }

    /// Relative luminance at pixel coordinates using ITU-R BT.709 weights,
    /// normalized to 0..1.
    #[inline]
    pub fn luminance709_at(&self, x: u32, y: u32) -> f32 {
        let (r, g, b) = self.rgb_at(x, y);
        (0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32) / 255.0
    }
}

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn longer_side(&self) -> f32 {
        self.w.max(self.h)
    }

    pub fn shorter_side(&self) -> f32 {
        self.w.min(self.h)
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.w && py >= self.y && py <= self.y + self.h
    }

    /// Exponential smoothing toward a target rectangle.
    pub fn lerp_toward(&self, target: &Rect, alpha: f32) -> Rect {
        Rect {
            x: self.x + (target.x - self.x) * alpha,
            y: self.y + (target.y - self.y) * alpha,
            w: self.w + (target.w - self.w) * alpha,
            h: self.h + (target.h - self.h) * alpha,
        }
    }

    /// Clip to frame bounds while keeping width/height strictly positive.
    pub fn clipped_to(&self, frame_w: u32, frame_h: u32) -> Rect {
        let fw = frame_w as f32;
        let fh = frame_h as f32;
        let x = self.x.clamp(0.0, (fw - 1.0).max(0.0));
        let y = self.y.clamp(0.0, (fh - 1.0).max(0.0));
        let w = self.w.min(fw - x).max(1.0);
        let h = self.h.min(fh - y).max(1.0);
        Rect { x, y, w, h }
    }
}

/// Categorized quality failure reasons, shared by the advisory scorer and
/// the binding post-capture gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityIssue {
    FaceTooSmall,
    PoorOrientation,
    Misaligned,
    PoorLighting,
    Blurry,
    FaceNotDominant,
}

impl QualityIssue {
    /// Severe categories compound into a hard retry at the gate.
    pub fn is_severe(&self) -> bool {
        matches!(self, QualityIssue::Blurry | QualityIssue::PoorLighting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityIssue::FaceTooSmall => "face_too_small",
            QualityIssue::PoorOrientation => "poor_orientation",
            QualityIssue::Misaligned => "misaligned",
            QualityIssue::PoorLighting => "poor_lighting",
            QualityIssue::Blurry => "blurry",
            QualityIssue::FaceNotDominant => "face_not_dominant",
        }
    }
}

/// Pass/fail decision with ordered failure reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub passed: bool,
    pub issues: Vec<QualityIssue>,
}

impl QualityVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    pub fn fail(issues: Vec<QualityIssue>) -> Self {
        Self {
            passed: false,
            issues,
        }
    }

    pub fn severe_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_severe()).count()
    }
}

/// Per-tick derived metrics for one frame. Recomputed every tick, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetrics {
    /// Smoothed guidance box in pixel space, clipped to frame bounds.
    pub guide_box: Rect,
    pub left_ear: f32,
    pub right_ear: f32,
    /// Roll proxy: absolute slope between eye centers.
    pub roll: f32,
    /// Yaw proxy: horizontal eye-midpoint offset normalized by box width.
    pub yaw_offset: f32,
    /// Pitch proxy: vertical eye-midpoint offset normalized by box height.
    pub pitch_offset: f32,
    pub orientation_ok: bool,
    /// Fraction of landmarks projecting inside the guidance box.
    pub alignment_ratio: f32,
    /// Normalized face bounding width.
    pub face_width_fraction: f32,
    /// Mean BT.601 luma of the box region; sampled every Nth tick.
    pub brightness: Option<f32>,
    /// Mean absolute luma gradient of the box region; sampled every Nth tick.
    pub sharpness: Option<f32>,
}

impl FrameMetrics {
    /// Average eye aspect ratio across both eyes.
    pub fn mean_ear(&self) -> f32 {
        (self.left_ear + self.right_ear) / 2.0
    }
}

/// Raster encoding for the normalized capture artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OutputFormat {
    Png,
    Jpeg { quality: u8 },
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Png
    }
}

/// The standardized square face image handed to the caller. The sole
/// artifact a capture session produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCapture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub session_id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Minor gate issues the acceptance policy waved through.
    pub accepted_with: Vec<QualityIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_clip_stays_positive() {
        let r = Rect::new(-50.0, -20.0, 5000.0, 5000.0).clipped_to(640, 480);
        assert!(r.x >= 0.0 && r.y >= 0.0);
        assert!(r.w > 0.0 && r.h > 0.0);
        assert!(r.x + r.w <= 640.0);
        assert!(r.y + r.h <= 480.0);
    }

    #[test]
    fn test_rect_lerp_converges() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(10.0, 10.0, 120.0, 120.0);
        let s = a.lerp_toward(&b, 0.25);
        assert!((s.x - 2.5).abs() < 1e-5);
        assert!((s.w - 105.0).abs() < 1e-5);
    }

    #[test]
    fn test_severe_categories() {
        assert!(QualityIssue::Blurry.is_severe());
        assert!(QualityIssue::PoorLighting.is_severe());
        assert!(!QualityIssue::Misaligned.is_severe());
        let v = QualityVerdict::fail(vec![QualityIssue::Blurry, QualityIssue::Misaligned]);
        assert_eq!(v.severe_count(), 1);
    }

    #[test]
    fn test_luma_weights() {
        let frame = VideoFrame::new(vec![255, 255, 255], 1, 1);
        assert!((frame.luma601_at(0, 0) - 255.0).abs() < 0.5);
        assert!((frame.luminance709_at(0, 0) - 1.0).abs() < 1e-3);
    }
}
