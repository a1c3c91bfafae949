//! Geometry and quality analysis for a single frame.
//!
//! Derives the smoothed guidance box, orientation metrics and alignment
//! ratio every tick, and samples brightness/sharpness of the box region on
//! a throttled cadence since pixel read-back is the most expensive step in
//! the loop.

use crate::landmarks::{
    eye_aspect_ratio, eye_center, LandmarkSet, FACE_BOTTOM, FACE_LEFT, FACE_RIGHT, FACE_TOP,
    LEFT_EYE, RIGHT_EYE,
};
use crate::types::{FrameMetrics, Rect, VideoFrame};

/// Orientation thresholds are intentionally forgiving so natural head
/// position is not rejected.
const MAX_ROLL_SLOPE: f32 = 0.25;
const MAX_YAW_OFFSET: f32 = 0.25;
const MAX_PITCH_OFFSET: f32 = 0.20;

/// Grid resolution for region luma sampling.
const SAMPLE_GRID: u32 = 64;

/// Gradient scale bringing sharpness into a small dimensionless range.
const SHARPNESS_SCALE: f32 = 8.0;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Exponential smoothing factor for the guidance box.
    pub box_smoothing: f32,
    /// Proportional margins added around the anchor bounding box.
    pub margin_x: f32,
    pub margin_y: f32,
    /// Brightness/sharpness are sampled every Nth tick.
    pub sample_every_n: u32,
    /// Faces narrower than this fraction of the frame are rejected outright.
    pub min_face_fraction: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            box_smoothing: 0.25,
            margin_x: 0.08,
            margin_y: 0.10,
            sample_every_n: 6,
            min_face_fraction: 0.15,
        }
    }
}

/// Per-session analyzer state: the smoothed box and the sampling cadence.
#[derive(Debug)]
pub struct GeometryAnalyzer {
    cfg: AnalyzerConfig,
    smoothed: Option<Rect>,
    tick: u64,
    last_brightness: Option<f32>,
    last_sharpness: Option<f32>,
}

impl GeometryAnalyzer {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self {
            cfg,
            smoothed: None,
            tick: 0,
            last_brightness: None,
            last_sharpness: None,
        }
    }

    /// Clear all smoothing state; the next frame starts fresh.
    pub fn reset(&mut self) {
        self.smoothed = None;
        self.tick = 0;
        self.last_brightness = None;
        self.last_sharpness = None;
    }

    /// Analyze one frame. Returns `None` when the landmark set fails the
    /// validation guard or the face is too small to trust; the smoothed box
    /// is left untouched in that case so garbage geometry cannot corrupt it.
    pub fn analyze(&mut self, frame: &VideoFrame, set: &LandmarkSet) -> Option<FrameMetrics> {
        if !set.validate() {
            log::debug!("landmark set failed validation guard");
            return None;
        }

        let face_width = set.face_width();
        if face_width < self.cfg.min_face_fraction {
            log::debug!("face too small to analyze: {:.3} normalized", face_width);
            return None;
        }

        let fw = frame.width as f32;
        let fh = frame.height as f32;

        // Target box from the four anchors, expanded by asymmetric margins.
        let left = set.get(FACE_LEFT)?;
        let right = set.get(FACE_RIGHT)?;
        let top = set.get(FACE_TOP)?;
        let bottom = set.get(FACE_BOTTOM)?;

        let min_x = left.x.min(right.x) * fw;
        let max_x = left.x.max(right.x) * fw;
        let min_y = top.y.min(bottom.y) * fh;
        let max_y = top.y.max(bottom.y) * fh;
        let bw = max_x - min_x;
        let bh = max_y - min_y;

        let target = Rect::new(
            min_x - bw * self.cfg.margin_x,
            min_y - bh * self.cfg.margin_y,
            bw * (1.0 + 2.0 * self.cfg.margin_x),
            bh * (1.0 + 2.0 * self.cfg.margin_y),
        );

        let smoothed = match self.smoothed {
            Some(prev) => prev.lerp_toward(&target, self.cfg.box_smoothing),
            None => target,
        };
        let guide_box = smoothed.clipped_to(frame.width, frame.height);
        self.smoothed = Some(guide_box);

        // Orientation proxies from the eye centers.
        let (lx, ly) = eye_center(set, &LEFT_EYE)?;
        let (rx, ry) = eye_center(set, &RIGHT_EYE)?;
        let dx = (rx - lx) * fw;
        let dy = (ry - ly) * fh;
        let roll = if dx.abs() > f32::EPSILON {
            (dy / dx).abs()
        } else {
            1.0
        };
        let (cx, cy) = guide_box.center();
        let mid_x = (lx + rx) / 2.0 * fw;
        let mid_y = (ly + ry) / 2.0 * fh;
        let yaw_offset = (mid_x - cx).abs() / guide_box.w;
        let pitch_offset = (mid_y - cy).abs() / guide_box.h;
        let orientation_ok =
            roll < MAX_ROLL_SLOPE && yaw_offset < MAX_YAW_OFFSET && pitch_offset < MAX_PITCH_OFFSET;

        // Alignment: fraction of all landmarks inside the smoothed box.
        let inside = set
            .points()
            .iter()
            .filter(|p| guide_box.contains(p.x * fw, p.y * fh))
            .count();
        let alignment_ratio = inside as f32 / set.len() as f32;

        // Throttled pixel read-back.
        if self.tick % self.cfg.sample_every_n.max(1) as u64 == 0 {
            let (brightness, sharpness) = sample_region(frame, &guide_box);
            self.last_brightness = Some(brightness);
            self.last_sharpness = Some(sharpness);
        }
        self.tick += 1;

        Some(FrameMetrics {
            guide_box,
            left_ear: eye_aspect_ratio(set, &LEFT_EYE),
            right_ear: eye_aspect_ratio(set, &RIGHT_EYE),
            roll,
            yaw_offset,
            pitch_offset,
            orientation_ok,
            alignment_ratio,
            face_width_fraction: face_width,
            brightness: self.last_brightness,
            sharpness: self.last_sharpness,
        })
    }
}

/// Resample the box region on a fixed low-resolution grid and derive mean
/// BT.601 luma (0-255) and mean absolute luma gradient scaled to a small
/// dimensionless range.
pub(crate) fn sample_region(frame: &VideoFrame, region: &Rect) -> (f32, f32) {
    let grid = SAMPLE_GRID;
    let mut lumas = vec![0.0f32; (grid * grid) as usize];
    for gy in 0..grid {
        for gx in 0..grid {
            let px = region.x + region.w * (gx as f32 + 0.5) / grid as f32;
            let py = region.y + region.h * (gy as f32 + 0.5) / grid as f32;
            lumas[(gy * grid + gx) as usize] = frame.luma601_at(px as u32, py as u32);
        }
    }

    let mean = lumas.iter().sum::<f32>() / lumas.len() as f32;

    let mut grad_sum = 0.0f32;
    let mut grad_count = 0u32;
    for gy in 0..grid {
        for gx in 0..grid {
            let idx = (gy * grid + gx) as usize;
            if gx + 1 < grid {
                grad_sum += (lumas[idx + 1] - lumas[idx]).abs();
                grad_count += 1;
            }
            if gy + 1 < grid {
                grad_sum += (lumas[idx + grid as usize] - lumas[idx]).abs();
                grad_count += 1;
            }
        }
    }
    let sharpness = if grad_count > 0 {
        grad_sum / grad_count as f32 / SHARPNESS_SCALE
    } else {
        0.0
    };

    (mean, sharpness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checker_frame, face_landmarks, flat_frame};

    fn analyzer() -> GeometryAnalyzer {
        GeometryAnalyzer::new(AnalyzerConfig::default())
    }

    #[test]
    fn test_box_within_frame_bounds() {
        let frame = flat_frame(640, 480, 128);
        let set = face_landmarks(0.5, 0.5, 0.45, 0.35);
        let mut a = analyzer();
        for _ in 0..20 {
            let m = a.analyze(&frame, &set).expect("metrics");
            let b = m.guide_box;
            assert!(b.x >= 0.0 && b.y >= 0.0);
            assert!(b.w > 0.0 && b.h > 0.0);
            assert!(b.x + b.w <= 640.0);
            assert!(b.y + b.h <= 480.0);
        }
    }

    #[test]
    fn test_small_face_rejected() {
        let frame = flat_frame(640, 480, 128);
        let set = face_landmarks(0.5, 0.5, 0.05, 0.35);
        let mut a = analyzer();
        assert!(a.analyze(&frame, &set).is_none());
        // Rejection must not seed the smoothed box.
        assert!(a.smoothed.is_none());
    }

    #[test]
    fn test_centered_face_is_aligned_and_oriented() {
        let frame = flat_frame(640, 480, 128);
        let set = face_landmarks(0.5, 0.5, 0.22, 0.35);
        let mut a = analyzer();
        let m = a.analyze(&frame, &set).unwrap();
        assert!(m.orientation_ok, "roll={} yaw={} pitch={}", m.roll, m.yaw_offset, m.pitch_offset);
        assert!(m.alignment_ratio >= 0.85);
    }

    #[test]
    fn test_sampling_throttled() {
        let frame = flat_frame(640, 480, 128);
        let set = face_landmarks(0.5, 0.5, 0.22, 0.35);
        let mut a = analyzer();
        let first = a.analyze(&frame, &set).unwrap();
        assert!(first.brightness.is_some());
        // Ticks 1..5 reuse the sampled values; tick 6 resamples.
        for _ in 0..5 {
            let m = a.analyze(&frame, &set).unwrap();
            assert_eq!(m.brightness, first.brightness);
        }
    }

    #[test]
    fn test_flat_region_has_zero_sharpness() {
        let frame = flat_frame(320, 240, 128);
        let (brightness, sharpness) = sample_region(&frame, &Rect::new(10.0, 10.0, 200.0, 200.0));
        assert!((brightness - 128.0).abs() < 1.0);
        assert!(sharpness < 0.01);
    }

    #[test]
    fn test_checker_region_is_sharp_and_midtone() {
        let frame = checker_frame(640, 480, 4, 30, 225);
        let (brightness, sharpness) = sample_region(&frame, &Rect::new(50.0, 50.0, 400.0, 300.0));
        assert!(brightness > 60.0 && brightness < 220.0);
        assert!(sharpness >= 1.5);
    }
}
