use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    DetectorUnavailable(String),
    DetectorError(String),
    InvalidFrame(String),
    ControlError(String),
    EncodingError(String),
    ConfigError(String),
    SessionError(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptureError::DetectorUnavailable(msg) => {
                write!(f, "Landmark detector unavailable: {}", msg)
            }
            CaptureError::DetectorError(msg) => write!(f, "Landmark detector error: {}", msg),
            CaptureError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            CaptureError::ControlError(msg) => write!(f, "Hardware control error: {}", msg),
            CaptureError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            CaptureError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CaptureError::SessionError(msg) => write!(f, "Session error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}
