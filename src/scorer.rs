//! Advisory readiness scoring.
//!
//! Folds the analyzer's metrics into one composite score plus human-readable
//! guidance. "Ready" requires both the composite score and the alignment
//! ratio to clear their gates independently; a well-lit, well-sized face
//! that drifted outside the box still fails.

use crate::types::{FrameMetrics, QualityIssue, QualityVerdict};
use serde::Serialize;

const WEIGHT_ORIENTATION: f32 = 0.35;
const WEIGHT_SIZE: f32 = 0.25;
const WEIGHT_BRIGHTNESS: f32 = 0.20;
const WEIGHT_SHARPNESS: f32 = 0.20;

/// Ideal and acceptable brightness bands in BT.601 luma units.
const BRIGHTNESS_IDEAL: (f32, f32) = (85.0, 200.0);
const BRIGHTNESS_ACCEPT: (f32, f32) = (55.0, 220.0);

/// Neutral partial credit used when a sub-metric has not been sampled yet.
/// Keeps the composite well-defined under partial degradation.
const NEUTRAL_SCORE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Composite score gate for readiness.
    pub ready_score: f32,
    /// Independent alignment-ratio gate.
    pub alignment_min_ratio: f32,
    /// Target box size as a fraction of the frame's longer side.
    pub size_target_fraction: f32,
    /// Sharpness value at which the sharpness sub-score saturates.
    pub sharpness_target: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            ready_score: 0.72,
            alignment_min_ratio: 0.85,
            size_target_fraction: 0.35,
            sharpness_target: 3.5,
        }
    }
}

/// One tick's advisory decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub composite: f32,
    pub ready: bool,
    pub aligned: bool,
    pub size_score: f32,
    pub brightness_score: f32,
    pub sharpness_score: f32,
    pub orientation_score: f32,
    /// Unmet conditions in UI-ready wording.
    pub guidance: Vec<&'static str>,
    pub verdict: QualityVerdict,
}

#[derive(Debug, Clone)]
pub struct ReadinessScorer {
    cfg: ScorerConfig,
}

impl ReadinessScorer {
    pub fn new(cfg: ScorerConfig) -> Self {
        Self { cfg }
    }

    pub fn score(&self, metrics: &FrameMetrics, frame_w: u32, frame_h: u32) -> ReadinessReport {
        let longer_side = frame_w.max(frame_h) as f32;
        let target = (longer_side * self.cfg.size_target_fraction).max(1.0);
        let size_score = (metrics.guide_box.shorter_side() / target).clamp(0.0, 1.0);

        let brightness_score = match metrics.brightness {
            Some(b) => brightness_subscore(b),
            None => NEUTRAL_SCORE,
        };

        let sharpness_score = match metrics.sharpness {
            Some(s) => (s / self.cfg.sharpness_target).clamp(0.0, 1.0),
            None => NEUTRAL_SCORE,
        };

        // Partial credit for momentary off-orientation avoids flapping on
        // micro-movements.
        let orientation_score = if metrics.orientation_ok { 1.0 } else { 0.5 };

        let composite = (WEIGHT_ORIENTATION * orientation_score
            + WEIGHT_SIZE * size_score
            + WEIGHT_BRIGHTNESS * brightness_score
            + WEIGHT_SHARPNESS * sharpness_score)
            .clamp(0.0, 1.0);

        let aligned = metrics.alignment_ratio >= self.cfg.alignment_min_ratio;
        let ready = composite >= self.cfg.ready_score && aligned;

        let mut guidance = Vec::new();
        let mut issues = Vec::new();
        if size_score < 1.0 {
            guidance.push("move closer");
            if size_score < 0.7 {
                issues.push(QualityIssue::FaceTooSmall);
            }
        }
        if !metrics.orientation_ok {
            guidance.push("face front");
            issues.push(QualityIssue::PoorOrientation);
        }
        if brightness_score < 1.0 {
            guidance.push("lighting");
            if brightness_score < 0.5 {
                issues.push(QualityIssue::PoorLighting);
            }
        }
        if sharpness_score < 1.0 {
            guidance.push("steady focus");
            if sharpness_score < 0.5 {
                issues.push(QualityIssue::Blurry);
            }
        }
        if !aligned {
            guidance.push("align within frame");
            issues.push(QualityIssue::Misaligned);
        }

        let verdict = if ready {
            QualityVerdict::pass()
        } else {
            QualityVerdict::fail(issues)
        };

        ReadinessReport {
            composite,
            ready,
            aligned,
            size_score,
            brightness_score,
            sharpness_score,
            orientation_score,
            guidance,
            verdict,
        }
    }
}

/// 1.0 inside the ideal band, linear taper through the acceptable band,
/// zero beyond it.
fn brightness_subscore(b: f32) -> f32 {
    let (ideal_lo, ideal_hi) = BRIGHTNESS_IDEAL;
    let (accept_lo, accept_hi) = BRIGHTNESS_ACCEPT;
    if !b.is_finite() {
        return NEUTRAL_SCORE;
    }
    if (ideal_lo..=ideal_hi).contains(&b) {
        1.0
    } else if b >= accept_lo && b < ideal_lo {
        (b - accept_lo) / (ideal_lo - accept_lo)
    } else if b > ideal_hi && b <= accept_hi {
        (accept_hi - b) / (accept_hi - ideal_hi)
    } else {
        0.0
    }
}
