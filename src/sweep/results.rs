//! Result series produced by a sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One measured frequency point.
///
/// `amplitude_db` and `phase_deg` are either values computed at this frequency or
/// copies of the previous point's values, never the instrument's invalid sentinel.
/// When the first point of a sweep could not be measured its values are `NaN` and
/// flagged as carried. Serialized, a `NaN` value is `null` and reads back as `NaN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPoint {
    /// Stimulus frequency in Hz
    pub frequency_hz: f64,
    /// Gain `20·log10(A1/A2)` in dB
    #[serde(with = "nan_as_null")]
    pub amplitude_db: f64,
    /// Phase of CH1 relative to CH2 in degrees, offset applied
    #[serde(with = "nan_as_null")]
    pub phase_deg: f64,
    /// Amplitude copied from the previous point
    #[serde(default)]
    pub amplitude_carried: bool,
    /// Phase copied from the previous point
    #[serde(default)]
    pub phase_carried: bool,
    /// Autoranging failed at this frequency
    #[serde(default)]
    pub ranging_failed: bool,
}

impl FrequencyPoint {
    /// A point whose values were both measured at its own frequency
    pub fn measured(frequency_hz: f64, amplitude_db: f64, phase_deg: f64) -> Self {
        Self {
            frequency_hz,
            amplitude_db,
            phase_deg,
            amplitude_carried: false,
            phase_carried: false,
            ranging_failed: false,
        }
    }

    /// Neither value was carried from the previous point
    pub fn is_fully_measured(&self) -> bool {
        !self.amplitude_carried && !self.phase_carried
    }
}

/// Ordered sweep results, one point per planned frequency.
///
/// Only the sweep controller appends; consumers get read-only access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSeries {
    points: Vec<FrequencyPoint>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ResultSeries {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn push(&mut self, point: FrequencyPoint) {
        self.points.push(point);
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// All points in sweep order
    pub fn points(&self) -> &[FrequencyPoint] {
        &self.points
    }

    /// Iterate points in sweep order
    pub fn iter(&self) -> std::slice::Iter<'_, FrequencyPoint> {
        self.points.iter()
    }

    /// Number of recorded points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True before the first point is recorded
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point at 0-based `index`
    pub fn get(&self, index: usize) -> Option<&FrequencyPoint> {
        self.points.get(index)
    }

    /// Most recently recorded point
    pub fn last(&self) -> Option<&FrequencyPoint> {
        self.points.last()
    }

    /// UTC time the sweep started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `None` while the sweep is running or when it aborted
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Frequency column
    pub fn frequencies(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency_hz).collect()
    }

    /// Gain column
    pub fn amplitudes_db(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.amplitude_db).collect()
    }

    /// Phase column
    pub fn phases_deg(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.phase_deg).collect()
    }

    /// Number of points with at least one carried-forward value
    pub fn carried_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| !p.is_fully_measured())
            .count()
    }
}

impl<'a> IntoIterator for &'a ResultSeries {
    type Item = &'a FrequencyPoint;
    type IntoIter = std::slice::Iter<'a, FrequencyPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// JSON has no NaN: write it as `null`, read `null` back as NaN
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let value = (!value.is_nan()).then_some(*value);
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
