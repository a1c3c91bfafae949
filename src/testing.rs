//! Synthetic test data for offline pipeline testing.
//!
//! Provides patterned frames and parameterized landmark sets so every loop
//! in the crate can be exercised without a camera or a landmark model.

use crate::errors::CaptureError;
use crate::landmarks::{
    Landmark, LandmarkSet, LandmarkSource, FACE_BOTTOM, FACE_LEFT, FACE_RIGHT, FACE_TOP, LEFT_EYE,
    MIN_LANDMARKS, RIGHT_EYE,
};
use crate::pipeline::FrameSource;
use crate::types::VideoFrame;

/// Uniform midtone frame: useful for brightness paths, useless for sharpness.
pub fn flat_frame(width: u32, height: u32, luma: u8) -> VideoFrame {
    VideoFrame::new(vec![luma; (width * height * 3) as usize], width, height)
}

/// Checkerboard frame: high-gradient content that passes sharpness checks
/// while averaging to a midtone.
pub fn checker_frame(width: u32, height: u32, check: u32, dark: u8, light: u8) -> VideoFrame {
    let check = check.max(1);
    let mut data = vec![0u8; (width * height * 3) as usize];
    for y in 0..height {
        for x in 0..width {
            let v = if ((x / check) + (y / check)) % 2 == 0 {
                light
            } else {
                dark
            };
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = v;
            data[idx + 1] = v;
            data[idx + 2] = v;
        }
    }
    VideoFrame::new(data, width, height)
}

/// Horizontal luma gradient frame.
pub fn gradient_frame(width: u32, height: u32) -> VideoFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    for y in 0..height {
        for x in 0..width {
            let v = (x * 255 / width.max(1)) as u8;
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = v;
            data[idx + 1] = v;
            data[idx + 2] = v;
        }
    }
    VideoFrame::new(data, width, height)
}

/// Build a full 468-point landmark set for a synthetic front-facing face.
///
/// The face is centered at normalized `(cx, cy)` with half-width
/// `half_width`; both eyes are placed symmetrically with the requested eye
/// aspect ratio. Filler landmarks are distributed inside the face bounds so
/// alignment comes out high.
pub fn face_landmarks(cx: f32, cy: f32, half_width: f32, ear: f32) -> LandmarkSet {
    let hw = half_width;
    let hh = half_width * 1.3;

    // Filler grid strictly inside the anchor box.
    let mut pts = Vec::with_capacity(MIN_LANDMARKS);
    let per_row = 22usize;
    for i in 0..MIN_LANDMARKS {
        let gx = (i % per_row) as f32 / (per_row - 1) as f32;
        let gy = (i / per_row) as f32 / ((MIN_LANDMARKS / per_row) as f32);
        pts.push(Landmark {
            x: cx + (gx - 0.5) * 1.8 * hw,
            y: cy + (gy - 0.5) * 1.8 * hh,
            z: 0.0,
        });
    }

    pts[FACE_LEFT] = Landmark {
        x: cx - hw,
        y: cy,
        z: 0.0,
    };
    pts[FACE_RIGHT] = Landmark {
        x: cx + hw,
        y: cy,
        z: 0.0,
    };
    pts[FACE_TOP] = Landmark {
        x: cx,
        y: cy - hh,
        z: 0.0,
    };
    pts[FACE_BOTTOM] = Landmark {
        x: cx,
        y: cy + hh,
        z: 0.0,
    };

    place_eye(&mut pts, &LEFT_EYE, cx - hw * 0.4, cy - hh * 0.25, hw * 0.5, ear);
    place_eye(&mut pts, &RIGHT_EYE, cx + hw * 0.4, cy - hh * 0.25, hw * 0.5, ear);

    LandmarkSet::new(pts)
}

fn place_eye(pts: &mut [Landmark], eye: &[usize; 6], ex: f32, ey: f32, ew: f32, ear: f32) {
    let half_h = ear * ew / 2.0;
    let lm = |x: f32, y: f32| Landmark { x, y, z: 0.0 };
    pts[eye[0]] = lm(ex - ew / 2.0, ey);
    pts[eye[3]] = lm(ex + ew / 2.0, ey);
    pts[eye[1]] = lm(ex - ew / 6.0, ey - half_h);
    pts[eye[2]] = lm(ex + ew / 6.0, ey - half_h);
    pts[eye[5]] = lm(ex - ew / 6.0, ey + half_h);
    pts[eye[4]] = lm(ex + ew / 6.0, ey + half_h);
}

/// Frame source that hands out clones of one fixed frame.
pub struct FixedFrameSource {
    frame: VideoFrame,
}

impl FixedFrameSource {
    pub fn new(frame: VideoFrame) -> Self {
        Self { frame }
    }
}

impl FrameSource for FixedFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }

    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        Ok(self.frame.clone())
    }
}

/// Landmark source replaying a scripted sequence; repeats the last entry
/// once the script is exhausted.
pub struct ScriptedLandmarkSource {
    script: Vec<Option<LandmarkSet>>,
    index: usize,
    pub refinement_enabled: bool,
}

impl ScriptedLandmarkSource {
    pub fn new(script: Vec<Option<LandmarkSet>>) -> Self {
        Self {
            script,
            index: 0,
            refinement_enabled: true,
        }
    }

    pub fn repeating(set: LandmarkSet) -> Self {
        Self::new(vec![Some(set)])
    }
}

impl LandmarkSource for ScriptedLandmarkSource {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<LandmarkSet>, CaptureError> {
        let entry = self
            .script
            .get(self.index)
            .or_else(|| self.script.last())
            .cloned()
            .flatten();
        if self.index < self.script.len() {
            self.index += 1;
        }
        Ok(entry)
    }

    fn set_refinement(&mut self, enabled: bool) {
        self.refinement_enabled = enabled;
    }
}

/// Landmark source whose initialization always fails; models a missing or
/// broken detector backend.
pub struct UnavailableLandmarkSource;

impl LandmarkSource for UnavailableLandmarkSource {
    fn warm_up(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::DetectorUnavailable(
            "synthetic detector configured as unavailable".to_string(),
        ))
    }

    fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<LandmarkSet>, CaptureError> {
        Err(CaptureError::DetectorError("not initialized".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::eye_aspect_ratio;

    #[test]
    fn test_face_landmarks_full_topology() {
        let set = face_landmarks(0.5, 0.5, 0.25, 0.35);
        assert_eq!(set.len(), MIN_LANDMARKS);
        assert!(set.validate());
    }

    #[test]
    fn test_face_landmarks_requested_ear() {
        let set = face_landmarks(0.5, 0.5, 0.25, 0.32);
        let left = eye_aspect_ratio(&set, &LEFT_EYE);
        let right = eye_aspect_ratio(&set, &RIGHT_EYE);
        assert!((left - 0.32).abs() < 1e-3);
        assert!((right - 0.32).abs() < 1e-3);
    }

    #[test]
    fn test_checker_frame_midtone_average() {
        let frame = checker_frame(64, 64, 4, 30, 225);
        let mut sum = 0.0;
        for y in 0..64 {
            for x in 0..64 {
                sum += frame.luma601_at(x, y);
            }
        }
        let mean = sum / (64.0 * 64.0);
        assert!((mean - 127.5).abs() < 5.0);
    }
}
