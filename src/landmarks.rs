//! Pluggable landmark detection contract and eye geometry.
//!
//! Index constants target the 468-point FaceMesh topology. An implementation
//! backed by a different landmark model must remap the anchor and eye
//! indices here; nothing else in the crate hard-codes topology.

use crate::errors::CaptureError;
use crate::types::VideoFrame;
use serde::{Deserialize, Serialize};

/// Minimum landmark count the geometry trusts.
pub const MIN_LANDMARKS: usize = 468;

/// Anchor landmarks bounding the face: leftmost, rightmost, top, bottom.
pub const FACE_LEFT: usize = 234;
pub const FACE_RIGHT: usize = 454;
pub const FACE_TOP: usize = 10;
pub const FACE_BOTTOM: usize = 152;

/// Eye contour indices ordered outer corner, two upper lid points, inner
/// corner, two lower lid points.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// Indices that must be finite before any geometry runs.
pub const KEY_INDICES: [usize; 8] = [
    FACE_LEFT, FACE_RIGHT, FACE_TOP, FACE_BOTTOM, LEFT_EYE[0], LEFT_EYE[3], RIGHT_EYE[0],
    RIGHT_EYE[3],
];

/// One detected facial keypoint in normalized [0,1] coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Ordered landmark set for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    /// Guard applied before any geometry is trusted: enough points, and all
    /// key indices are finite numeric pairs.
    pub fn validate(&self) -> bool {
        if self.points.len() < MIN_LANDMARKS {
            return false;
        }
        KEY_INDICES.iter().all(|&i| {
            self.points
                .get(i)
                .map(|p| p.x.is_finite() && p.y.is_finite())
                .unwrap_or(false)
        })
    }

    /// Normalized face bounding width from the side anchors.
    pub fn face_width(&self) -> f32 {
        match (self.get(FACE_RIGHT), self.get(FACE_LEFT)) {
            (Some(r), Some(l)) => (r.x - l.x).abs(),
            _ => 0.0,
        }
    }
}

fn dist(a: Landmark, b: Landmark) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Eye aspect ratio: eye height over eye width, the standard blink proxy.
/// Returns 0.0 if the eye width collapses to nothing.
pub fn eye_aspect_ratio(set: &LandmarkSet, eye: &[usize; 6]) -> f32 {
    let p: Vec<Landmark> = match eye.iter().map(|&i| set.get(i)).collect::<Option<Vec<_>>>() {
        Some(p) => p,
        None => return 0.0,
    };
    let width = dist(p[0], p[3]);
    if width <= f32::EPSILON {
        return 0.0;
    }
    (dist(p[1], p[5]) + dist(p[2], p[4])) / (2.0 * width)
}

/// Center of an eye contour in normalized coordinates.
pub fn eye_center(set: &LandmarkSet, eye: &[usize; 6]) -> Option<(f32, f32)> {
    let mut x = 0.0;
    let mut y = 0.0;
    for &i in eye {
        let p = set.get(i)?;
        x += p.x;
        y += p.y;
    }
    Some((x / 6.0, y / 6.0))
}

/// Adaptive eye-aspect-ratio baseline.
///
/// Tracks the user's natural open-eye EAR with a slow decay and derives a
/// closure threshold from it, so blink detection adapts to eye shape. Every
/// derived threshold is clamped to a fixed range to prevent drift.
#[derive(Debug, Clone)]
pub struct EarBaseline {
    baseline: f32,
}

const BASELINE_DECAY: f32 = 0.92;
const THRESHOLD_FACTOR: f32 = 0.75;
const THRESHOLD_MIN: f32 = 0.20;
const THRESHOLD_MAX: f32 = 0.30;

impl EarBaseline {
    pub fn new() -> Self {
        Self { baseline: 0.28 }
    }

    /// Blend in a new reading. Callers must only feed open-eye frames.
    pub fn update(&mut self, ear: f32) {
        if ear.is_finite() && ear > 0.0 {
            self.baseline = BASELINE_DECAY * self.baseline + (1.0 - BASELINE_DECAY) * ear;
        }
    }

    /// Dynamic closure threshold, always within [0.20, 0.30].
    pub fn threshold(&self) -> f32 {
        (self.baseline * THRESHOLD_FACTOR).clamp(THRESHOLD_MIN, THRESHOLD_MAX)
    }
}

impl Default for EarBaseline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pluggable landmark detector.
///
/// `detect` returns zero-or-one landmark set for a frame. Implementations
/// are expected to be synchronous within a tick; the pipeline never issues
/// a second call before the previous one returns.
pub trait LandmarkSource: Send {
    /// Probe readiness before the pipeline starts. A failure here is the
    /// only detector error that propagates to the caller.
    fn warm_up(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, CaptureError>;

    /// One-way cost relaxation hook; called when pipeline throughput drops
    /// below the floor. Default is a no-op.
    fn set_refinement(&mut self, _enabled: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye_points(ear: f32) -> LandmarkSet {
        // Eye with width 0.1 centered at (0.5, 0.5); lid points placed so the
        // aspect ratio comes out to exactly `ear`.
        let mut pts = vec![
            Landmark {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            };
            MIN_LANDMARKS
        ];
        let half_h = ear * 0.1 / 2.0;
        pts[LEFT_EYE[0]] = Landmark {
            x: 0.45,
            y: 0.5,
            z: 0.0,
        };
        pts[LEFT_EYE[3]] = Landmark {
            x: 0.55,
            y: 0.5,
            z: 0.0,
        };
        for (top, bot) in [(LEFT_EYE[1], LEFT_EYE[5]), (LEFT_EYE[2], LEFT_EYE[4])] {
            pts[top] = Landmark {
                x: 0.5,
                y: 0.5 - half_h,
                z: 0.0,
            };
            pts[bot] = Landmark {
                x: 0.5,
                y: 0.5 + half_h,
                z: 0.0,
            };
        }
        LandmarkSet::new(pts)
    }

    #[test]
    fn test_ear_computation() {
        let set = eye_points(0.3);
        let ear = eye_aspect_ratio(&set, &LEFT_EYE);
        assert!((ear - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_ear_zero_width_eye() {
        let pts = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                z: 0.0,
            };
            MIN_LANDMARKS
        ];
        let set = LandmarkSet::new(pts);
        assert_eq!(eye_aspect_ratio(&set, &LEFT_EYE), 0.0);
    }

    #[test]
    fn test_validate_rejects_short_set() {
        let set = LandmarkSet::new(vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                z: 0.0,
            };
            100
        ]);
        assert!(!set.validate());
    }

    #[test]
    fn test_validate_rejects_nonfinite_anchor() {
        let mut pts = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                z: 0.0,
            };
            MIN_LANDMARKS
        ];
        pts[FACE_TOP].x = f32::NAN;
        assert!(!LandmarkSet::new(pts).validate());
    }

    #[test]
    fn test_baseline_threshold_clamped() {
        let mut b = EarBaseline::new();
        for _ in 0..200 {
            b.update(0.9);
        }
        assert!(b.threshold() <= 0.30);
        let mut low = EarBaseline::new();
        for _ in 0..200 {
            low.update(0.05);
        }
        assert!(low.threshold() >= 0.20);
    }

    #[test]
    fn test_baseline_adapts_upward() {
        let mut b = EarBaseline::new();
        let before = b.threshold();
        for _ in 0..50 {
            b.update(0.40);
        }
        assert!(b.threshold() >= before);
    }
}
