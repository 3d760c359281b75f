//! Acceptance threshold, parsed from the kiosk's opaque setting string.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Settings key the kiosk stores the threshold under.
pub const THRESHOLD_SETTING: &str = "face_recognition_threshold";

pub const DEFAULT_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("threshold {0:?} is not a number")]
    Unparsable(String),
    #[error("threshold {0} is outside (0, 1]")]
    OutOfRange(f32),
}

/// A score is accepted when `score >= threshold` (inclusive).
///
/// Always finite and in `(0, 1]`: a zero threshold would accept anything.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, ThresholdError> {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(ThresholdError::OutOfRange(value))
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ThresholdError> {
        let trimmed = raw.trim();
        let value: f32 = trimmed
            .parse()
            .map_err(|_| ThresholdError::Unparsable(trimmed.to_string()))?;
        Self::new(value)
    }

    /// Parse a stored setting, falling back to [`DEFAULT_THRESHOLD`] when it
    /// is missing or invalid.
    pub fn from_setting(raw: Option<&str>) -> Self {
        match raw.map(Self::parse) {
            Some(Ok(threshold)) => threshold,
            Some(Err(e)) => {
                tracing::warn!(error = %e, default = DEFAULT_THRESHOLD, "invalid threshold setting");
                Self::default()
            }
            None => Self::default(),
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn accepts(self, score: f32) -> bool {
        score >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl TryFrom<f32> for Threshold {
    type Error = ThresholdError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for f32 {
    fn from(t: Threshold) -> f32 {
        t.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
