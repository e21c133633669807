//! Frequency sweep plans.

use crate::error::{AppResult, BodeError};
use serde::{Deserialize, Serialize};

/// Distribution of sweep frequencies between start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    /// Equal steps in Hz
    #[default]
    Linear,
    /// Equal ratio between neighbouring frequencies
    Logarithmic,
}

/// Start/stop/step description of a sweep.
///
/// Construction validates the bounds, so a `SweepPlan` always yields
/// `step_count` strictly increasing frequencies ending exactly at `stop_hz`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPlan {
    start_hz: f64,
    stop_hz: f64,
    step_count: usize,
    spacing: Spacing,
}

impl SweepPlan {
    /// Validated plan.
    ///
    /// # Errors
    /// `BodeError::InvalidPlan` unless `0 < start_hz < stop_hz` (both finite) and
    /// `step_count >= 1`.
    pub fn new(start_hz: f64, stop_hz: f64, step_count: usize, spacing: Spacing) -> AppResult<Self> {
        if !(start_hz.is_finite() && start_hz > 0.0) {
            return Err(BodeError::InvalidPlan(format!(
                "start_hz must be positive, got {}",
                start_hz
            )));
        }
        if !(stop_hz.is_finite() && stop_hz > start_hz) {
            return Err(BodeError::InvalidPlan(format!(
                "stop_hz ({}) must be greater than start_hz ({})",
                stop_hz, start_hz
            )));
        }
        if step_count == 0 {
            return Err(BodeError::InvalidPlan(
                "step_count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            start_hz,
            stop_hz,
            step_count,
            spacing,
        })
    }

    /// Linear plan, the spacing the bench procedure was written for
    pub fn linear(start_hz: f64, stop_hz: f64, step_count: usize) -> AppResult<Self> {
        Self::new(start_hz, stop_hz, step_count, Spacing::Linear)
    }

    /// Logarithmic plan, for sweeps spanning decades
    pub fn logarithmic(start_hz: f64, stop_hz: f64, step_count: usize) -> AppResult<Self> {
        Self::new(start_hz, stop_hz, step_count, Spacing::Logarithmic)
    }

    /// First frequency
    pub fn start_hz(&self) -> f64 {
        self.start_hz
    }

    /// Last frequency
    pub fn stop_hz(&self) -> f64 {
        self.stop_hz
    }

    /// Number of points
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// How points are distributed
    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// Frequency of step `index` (0-based), clamped to the last step
    pub fn frequency_at(&self, index: usize) -> f64 {
        if self.step_count == 1 {
            return self.start_hz;
        }
        let last = self.step_count - 1;
        if index >= last {
            return self.stop_hz;
        }
        let t = index as f64 / last as f64;
        match self.spacing {
            Spacing::Linear => self.start_hz + t * (self.stop_hz - self.start_hz),
            Spacing::Logarithmic => self.start_hz * (self.stop_hz / self.start_hz).powf(t),
        }
    }

    /// All frequencies in sweep order
    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.step_count).map(|i| self.frequency_at(i)).collect()
    }
}
