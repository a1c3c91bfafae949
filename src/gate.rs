//! Post-capture quality gate and image normalization.
//!
//! At the capture instant the gate re-derives brightness and sharpness from
//! the current frame rather than trusting the throttled samples, then
//! applies binding thresholds. The normalizer crops a square around the
//! guidance box from the raw frame, resizes to a fixed square, applies a
//! light unsharp convolution against downscaling blur and encodes the
//! result.

use crate::analyzer::sample_region;
use crate::config::GateConfig;
use crate::errors::CaptureError;
use crate::types::{
    FrameMetrics, NormalizedCapture, OutputFormat, QualityIssue, QualityVerdict, Rect, VideoFrame,
};
use chrono::Utc;
use image::{imageops, ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;
use uuid::Uuid;

/// Crop side relative to the guidance box's longer dimension.
const CROP_EXPANSION: f32 = 1.08;

/// Binding pass/fail check applied exactly once per capture attempt.
#[derive(Debug, Clone)]
pub struct QualityGate {
    cfg: GateConfig,
}

impl QualityGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate the frame at the capture instant. Brightness and sharpness
    /// come from a fresh sample of the box region, never a stale tick.
    pub fn evaluate(&self, frame: &VideoFrame, metrics: &FrameMetrics) -> QualityVerdict {
        let (brightness, sharpness) = sample_region(frame, &metrics.guide_box);

        let mut issues = Vec::new();
        if metrics.face_width_fraction < self.cfg.min_face_fraction {
            issues.push(QualityIssue::FaceTooSmall);
        }
        if !metrics.orientation_ok {
            issues.push(QualityIssue::PoorOrientation);
        }
        if metrics.alignment_ratio < self.cfg.alignment_min {
            issues.push(QualityIssue::Misaligned);
        }
        if brightness < self.cfg.brightness_min || brightness > self.cfg.brightness_max {
            issues.push(QualityIssue::PoorLighting);
        }
        if sharpness < self.cfg.sharpness_min {
            issues.push(QualityIssue::Blurry);
        }
        let frame_area = (frame.width * frame.height) as f32;
        if frame_area > 0.0 && metrics.guide_box.area() / frame_area < self.cfg.min_area_ratio {
            issues.push(QualityIssue::FaceNotDominant);
        }

        if issues.is_empty() {
            QualityVerdict::pass()
        } else {
            QualityVerdict::fail(issues)
        }
    }
}

/// Crops, resizes, sharpens and encodes the final artifact.
#[derive(Debug, Clone)]
pub struct Normalizer {
    output_size: u32,
    sharpen_strength: f32,
    format: OutputFormat,
}

impl Normalizer {
    pub fn new(output_size: u32, sharpen_strength: f32, format: OutputFormat) -> Self {
        Self {
            output_size: output_size.max(16),
            sharpen_strength,
            format,
        }
    }

    /// Produce the standardized square image from the raw frame. Draws only
    /// from unannotated pixel data; guidance overlays never exist here.
    pub fn normalize(
        &self,
        frame: &VideoFrame,
        guide_box: &Rect,
        session_id: Uuid,
        accepted_with: Vec<QualityIssue>,
    ) -> Result<NormalizedCapture, CaptureError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(CaptureError::InvalidFrame("zero-sized frame".to_string()));
        }

        let crop = square_crop(guide_box, frame.width, frame.height);

        let side = crop.w as u32;
        let mut cropped: RgbImage = ImageBuffer::new(side, side);
        for y in 0..side {
            for x in 0..side {
                let (r, g, b) = frame.rgb_at(crop.x as u32 + x, crop.y as u32 + y);
                cropped.put_pixel(x, y, Rgb([r, g, b]));
            }
        }

        let resized = imageops::resize(
            &cropped,
            self.output_size,
            self.output_size,
            imageops::FilterType::Triangle,
        );
        let sharpened = unsharp(&resized, self.sharpen_strength);

        let mut buf = Vec::new();
        match self.format {
            OutputFormat::Png => {
                sharpened
                    .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                    .map_err(|e| CaptureError::EncodingError(format!("png encode: {}", e)))?;
            }
            OutputFormat::Jpeg { quality } => {
                let mut cursor = Cursor::new(&mut buf);
                let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut cursor,
                    quality.clamp(1, 100),
                );
                encoder
                    .encode_image(&sharpened)
                    .map_err(|e| CaptureError::EncodingError(format!("jpeg encode: {}", e)))?;
            }
        }

        Ok(NormalizedCapture {
            data: buf,
            width: self.output_size,
            height: self.output_size,
            format: self.format,
            session_id,
            captured_at: Utc::now(),
            accepted_with,
        })
    }
}

/// Square crop region centered on the guidance box, clamped to the frame.
fn square_crop(guide_box: &Rect, frame_w: u32, frame_h: u32) -> Rect {
    let fw = frame_w as f32;
    let fh = frame_h as f32;
    let side = (guide_box.longer_side() * CROP_EXPANSION)
        .min(fw)
        .min(fh)
        .max(1.0);
    let (cx, cy) = guide_box.center();
    let x = (cx - side / 2.0).clamp(0.0, fw - side);
    let y = (cy - side / 2.0).clamp(0.0, fh - side);
    Rect::new(x.floor(), y.floor(), side.floor().max(1.0), side.floor().max(1.0))
}

/// 3x3 unsharp-style convolution. Border pixels are copied unmodified.
fn unsharp(img: &RgbImage, strength: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 || strength <= 0.0 {
        return img.clone();
    }
    let center = 1.0 + 4.0 * strength;
    let mut out = img.clone();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut px = [0.0f32; 3];
            for c in 0..3 {
                let v = img.get_pixel(x, y).0[c] as f32 * center
                    - strength
                        * (img.get_pixel(x - 1, y).0[c] as f32
                            + img.get_pixel(x + 1, y).0[c] as f32
                            + img.get_pixel(x, y - 1).0[c] as f32
                            + img.get_pixel(x, y + 1).0[c] as f32);
                px[c] = v.clamp(0.0, 255.0);
            }
            out.put_pixel(x, y, Rgb([px[0] as u8, px[1] as u8, px[2] as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checker_frame, flat_frame};

    fn box_at(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::new(x, y, w, h)
    }

    fn metrics_with(guide_box: Rect, face_width_fraction: f32) -> FrameMetrics {
        FrameMetrics {
            guide_box,
            left_ear: 0.3,
            right_ear: 0.3,
            roll: 0.05,
            yaw_offset: 0.05,
            pitch_offset: 0.05,
            orientation_ok: true,
            alignment_ratio: 0.95,
            face_width_fraction,
            brightness: None,
            sharpness: None,
        }
    }

    #[test]
    fn test_gate_passes_sharp_midtone_face() {
        let gate = QualityGate::new(GateConfig::default());
        let frame = checker_frame(640, 480, 4, 30, 225);
        let m = metrics_with(box_at(150.0, 80.0, 300.0, 320.0), 0.45);
        let v = gate.evaluate(&frame, &m);
        assert!(v.passed, "issues: {:?}", v.issues);
    }

    #[test]
    fn test_gate_flags_blur_and_lighting_on_flat_dark_frame() {
        let gate = QualityGate::new(GateConfig::default());
        let frame = flat_frame(640, 480, 20);
        let m = metrics_with(box_at(150.0, 80.0, 300.0, 320.0), 0.45);
        let v = gate.evaluate(&frame, &m);
        assert!(!v.passed);
        assert!(v.issues.contains(&QualityIssue::Blurry));
        assert!(v.issues.contains(&QualityIssue::PoorLighting));
        assert_eq!(v.severe_count(), 2);
    }

    #[test]
    fn test_gate_flags_non_dominant_face() {
        let gate = QualityGate::new(GateConfig::default());
        let frame = checker_frame(640, 480, 4, 30, 225);
        let m = metrics_with(box_at(300.0, 200.0, 40.0, 40.0), 0.20);
        let v = gate.evaluate(&frame, &m);
        assert!(v.issues.contains(&QualityIssue::FaceNotDominant));
    }

    #[test]
    fn test_normalized_output_is_fixed_square() {
        let normalizer = Normalizer::new(384, 0.6, OutputFormat::Png);
        for (w, h) in [(640u32, 480u32), (1280, 720), (480, 640)] {
            let frame = checker_frame(w, h, 4, 30, 225);
            let gb = box_at(w as f32 * 0.3, h as f32 * 0.2, w as f32 * 0.4, h as f32 * 0.5);
            let cap = normalizer.normalize(&frame, &gb, Uuid::new_v4(), vec![]).unwrap();
            assert_eq!(cap.width, 384);
            assert_eq!(cap.height, 384);
            let decoded = image::load_from_memory(&cap.data).unwrap();
            assert_eq!(decoded.width(), 384);
            assert_eq!(decoded.height(), 384);
        }
    }

    #[test]
    fn test_square_crop_clamped_to_frame() {
        let crop = square_crop(&box_at(500.0, 300.0, 400.0, 300.0), 640, 480);
        assert!(crop.x >= 0.0 && crop.y >= 0.0);
        assert!(crop.x + crop.w <= 640.0);
        assert!(crop.y + crop.h <= 480.0);
        assert!((crop.w - crop.h).abs() < 1.0);
    }

    #[test]
    fn test_unsharp_copies_borders() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 100]));
        let out = unsharp(&img, 0.6);
        for x in 0..8 {
            assert_eq!(out.get_pixel(x, 0), img.get_pixel(x, 0));
            assert_eq!(out.get_pixel(x, 7), img.get_pixel(x, 7));
        }
    }

    #[test]
    fn test_jpeg_encoding_respects_format() {
        let normalizer = Normalizer::new(128, 0.6, OutputFormat::Jpeg { quality: 85 });
        let frame = checker_frame(320, 240, 4, 30, 225);
        let cap = normalizer
            .normalize(&frame, &box_at(60.0, 40.0, 150.0, 150.0), Uuid::new_v4(), vec![])
            .unwrap();
        // JPEG SOI marker.
        assert_eq!(&cap.data[0..2], &[0xFF, 0xD8]);
    }
}
