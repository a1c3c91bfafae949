//! Configuration for the capture pipeline, the post-capture gate and the
//! brightness controller.
//!
//! Provides TOML loading, saving and validation for all tunables.

use crate::errors::CaptureError;
use crate::types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCaptureConfig {
    pub pipeline: PipelineConfig,
    pub gate: GateConfig,
    pub brightness: BrightnessConfig,
}

/// Face pipeline and state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Consecutive ready ticks required before the blink phase.
    pub required_stable_frames: u32,
    /// Completed blink gestures required to trigger capture.
    pub required_blink_count: u32,
    /// Minimum time between counted blinks in milliseconds.
    pub blink_debounce_ms: u64,
    /// Delay between the blink gesture and the gate, in milliseconds.
    pub pending_delay_ms: u64,
    /// Faces narrower than this fraction of the frame are ignored.
    pub min_face_size_fraction: f32,
    /// Brightness/sharpness sampling cadence in ticks.
    pub sample_every_n: u32,
    /// Guidance box smoothing factor.
    pub box_smoothing: f32,
    /// Composite readiness score gate.
    pub ready_score: f32,
    /// Independent alignment ratio gate for readiness.
    pub alignment_min_ratio: f32,
    /// Side length of the normalized square output.
    pub output_size: u32,
    /// Unsharp convolution strength applied after downscaling.
    pub sharpen_strength: f32,
    /// Encoding of the capture artifact.
    pub output_format: OutputFormat,
    /// Effective-fps floor below which analysis cost is relaxed once.
    pub fps_floor: f32,
}

/// Binding thresholds for the post-capture quality gate. The severity
/// policy built on top of them is fixed; only the thresholds move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub brightness_min: f32,
    pub brightness_max: f32,
    pub sharpness_min: f32,
    pub alignment_min: f32,
    pub min_face_fraction: f32,
    /// Minimum guidance-box-to-frame area ratio.
    pub min_area_ratio: f32,
}

/// Brightness feedback controller configuration. Immutable for the
/// controller's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrightnessConfig {
    /// Target mean relative luminance, 0..1.
    pub target_luma: f32,
    /// Below this, torch is enabled (when supported).
    pub low_threshold: f32,
    /// Above this, torch is disabled.
    pub high_threshold: f32,
    /// Sampling interval; clamped to a 150 ms minimum at runtime.
    pub sampling_interval_ms: u64,
    pub auto_torch: bool,
    pub enable_exposure_tuning: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            required_stable_frames: 60,
            required_blink_count: 3,
            blink_debounce_ms: 600,
            pending_delay_ms: 1000,
            min_face_size_fraction: 0.15,
            sample_every_n: 6,
            box_smoothing: 0.25,
            ready_score: 0.72,
            alignment_min_ratio: 0.85,
            output_size: 384,
            sharpen_strength: 0.6,
            output_format: OutputFormat::Png,
            fps_floor: 15.0,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            brightness_min: 60.0,
            brightness_max: 220.0,
            sharpness_min: 1.5,
            alignment_min: 0.80,
            min_face_fraction: 0.15,
            min_area_ratio: 0.04,
        }
    }
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            target_luma: 0.55,
            low_threshold: 0.25,
            high_threshold: 0.80,
            sampling_interval_ms: 450,
            auto_torch: true,
            enable_exposure_tuning: false,
        }
    }
}

impl Default for FaceCaptureConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            gate: GateConfig::default(),
            brightness: BrightnessConfig::default(),
        }
    }
}

impl FaceCaptureConfig {
    /// Load configuration from a TOML file; missing file yields defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: FaceCaptureConfig = toml::from_str(&contents)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CaptureError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("facecapture.toml")
    }

    /// Load from the default location, falling back to defaults on error.
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let p = &self.pipeline;
        if p.required_stable_frames == 0 {
            return Err("required_stable_frames must be at least 1".to_string());
        }
        if p.required_blink_count == 0 {
            return Err("required_blink_count must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&p.min_face_size_fraction) {
            return Err("min_face_size_fraction must be in [0, 1)".to_string());
        }
        if !(0.0..=1.0).contains(&p.box_smoothing) {
            return Err("box_smoothing must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&p.ready_score) {
            return Err("ready_score must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&p.alignment_min_ratio) {
            return Err("alignment_min_ratio must be in [0, 1]".to_string());
        }
        if p.output_size < 16 || p.output_size > 4096 {
            return Err("output_size must be between 16 and 4096".to_string());
        }
        if p.sample_every_n == 0 {
            return Err("sample_every_n must be at least 1".to_string());
        }
        if let OutputFormat::Jpeg { quality } = p.output_format {
            if quality == 0 || quality > 100 {
                return Err("jpeg quality must be between 1 and 100".to_string());
            }
        }

        let g = &self.gate;
        if g.brightness_min >= g.brightness_max {
            return Err("gate brightness_min must be below brightness_max".to_string());
        }
        if !(0.0..=1.0).contains(&g.alignment_min) {
            return Err("gate alignment_min must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&g.min_area_ratio) {
            return Err("gate min_area_ratio must be in [0, 1]".to_string());
        }

        let b = &self.brightness;
        if !(0.0..=1.0).contains(&b.target_luma) {
            return Err("target_luma must be in [0, 1]".to_string());
        }
        if b.low_threshold >= b.high_threshold {
            return Err("low_threshold must be below high_threshold".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FaceCaptureConfig::default();
        assert_eq!(config.pipeline.required_stable_frames, 60);
        assert_eq!(config.pipeline.required_blink_count, 3);
        assert_eq!(config.pipeline.output_size, 384);
        assert!(config.brightness.auto_torch);
    }

    #[test]
    fn test_config_validation() {
        let config = FaceCaptureConfig::default();
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.pipeline.required_blink_count = 0;
        assert!(bad.validate().is_err());

        let mut bad_gate = FaceCaptureConfig::default();
        bad_gate.gate.brightness_min = 250.0;
        assert!(bad_gate.validate().is_err());

        let mut bad_brightness = FaceCaptureConfig::default();
        bad_brightness.brightness.low_threshold = 0.9;
        assert!(bad_brightness.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("facecapture.toml");

        let mut config = FaceCaptureConfig::default();
        config.pipeline.required_blink_count = 2;
        config.pipeline.output_format = OutputFormat::Jpeg { quality: 90 };
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = FaceCaptureConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.pipeline.required_blink_count, 2);
        assert_eq!(
            loaded.pipeline.output_format,
            OutputFormat::Jpeg { quality: 90 }
        );
        assert_eq!(
            loaded.brightness.sampling_interval_ms,
            config.brightness.sampling_interval_ms
        );
    }

    #[test]
    fn test_config_toml_format() {
        let config = FaceCaptureConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        assert!(toml_string.contains("[pipeline]"));
        assert!(toml_string.contains("[gate]"));
        assert!(toml_string.contains("[brightness]"));
        assert!(toml_string.contains("required_stable_frames"));
        assert!(toml_string.contains("target_luma"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = FaceCaptureConfig::load_from_file("nonexistent_file.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().pipeline.required_stable_frames, 60);
    }
}
