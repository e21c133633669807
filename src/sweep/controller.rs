//! Sweep controller
//!
//! Runs a [`SweepPlan`] against one instrument session. Per frequency:
//!
//! 1. Set the stimulus frequency and a timebase of one period per division.
//! 2. Autorange CH1 (response) then CH2 (reference), each within a time budget.
//! 3. Wait for the averaging acquisition to settle, read phase and both amplitudes.
//! 4. Record a [`FrequencyPoint`], carrying the previous value forward for every
//!    reading the instrument could not produce.
//!
//! Invalid readings and ranging failures stay local to their point and the sweep
//! continues. A communication error or the overall deadline aborts the sweep with
//! a [`SweepFailure`] that still holds the points recorded so far.

use crate::config::BodeConfig;
use crate::error::{AppResult, BodeError};
use crate::sweep::autorange::{autorange_within, ChannelRangeParams, RangeOutcome};
use crate::sweep::plan::SweepPlan;
use crate::sweep::results::{FrequencyPoint, ResultSeries};
use crate::traits::{BodeInstrument, Channel, MeasurementId, Reading};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything one sweep run needs besides the instrument
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    /// Frequencies to visit, in order
    pub plan: SweepPlan,
    /// Generator amplitude in volts peak-to-peak
    pub stimulus_amplitude_v: f64,
    /// Ranging of CH1
    pub response: ChannelRangeParams,
    /// Ranging of CH2
    pub reference: ChannelRangeParams,
    /// Time budget for one channel's autorange at one frequency
    pub autorange_timeout: Duration,
    /// Wait before reading, so the averaged acquisition reflects the new settings
    pub settle_delay: Duration,
    /// Subtracted from the raw phase reading
    pub phase_offset_deg: f64,
    /// Extra reads of the first point before recording a placeholder
    pub initial_retries: u32,
    /// Overall sweep deadline, checked before each point
    pub deadline: Option<Duration>,
}

impl SweepSettings {
    /// Bench defaults around `plan`
    pub fn new(plan: SweepPlan) -> Self {
        Self {
            plan,
            stimulus_amplitude_v: 1.0,
            response: ChannelRangeParams::default(),
            reference: ChannelRangeParams::default(),
            autorange_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            phase_offset_deg: 360.0,
            initial_retries: 3,
            deadline: None,
        }
    }

    /// Settings for the sweep described by `config`
    ///
    /// # Errors
    /// `BodeError::InvalidPlan` when the `[sweep]` section cannot produce a plan.
    pub fn from_config(config: &BodeConfig) -> AppResult<Self> {
        let sweep = &config.sweep;
        let plan = SweepPlan::new(sweep.start_hz, sweep.stop_hz, sweep.steps, sweep.spacing)?;
        Ok(Self {
            plan,
            stimulus_amplitude_v: config.stimulus.amplitude_v,
            response: config.autorange.response,
            reference: config.autorange.reference,
            autorange_timeout: Duration::from_millis(config.autorange.timeout_ms),
            settle_delay: Duration::from_millis(config.acquisition.settle_ms),
            phase_offset_deg: config.acquisition.phase_offset_deg,
            initial_retries: config.acquisition.initial_retries,
            deadline: sweep.deadline_secs.map(Duration::from_secs),
        })
    }

    fn range_params(&self, channel: Channel) -> ChannelRangeParams {
        match channel {
            Channel::Response => self.response,
            Channel::Reference => self.reference,
        }
    }
}

/// Progress report for one recorded point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepProgress {
    /// 1-based step number
    pub index: usize,
    /// Planned number of points
    pub total: usize,
    /// The point just recorded
    pub point: FrequencyPoint,
}

/// Receives a report after every recorded point
pub trait SweepObserver: Send {
    /// Called once per point, after it has been appended
    fn on_point(&mut self, progress: &SweepProgress);
}

impl<F> SweepObserver for F
where
    F: FnMut(&SweepProgress) + Send,
{
    fn on_point(&mut self, progress: &SweepProgress) {
        self(progress)
    }
}

/// Default observer: one `info!` line per point
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SweepObserver for TracingObserver {
    fn on_point(&mut self, progress: &SweepProgress) {
        let point = &progress.point;
        info!(
            "[{}/{}] {:.1} Hz: {:.3} dB, {:.2} deg",
            progress.index, progress.total, point.frequency_hz, point.amplitude_db, point.phase_deg
        );
    }
}

/// A sweep that stopped before its last point
#[derive(Debug, Error)]
#[error("sweep aborted after {} of {total} points: {error}", .partial.len())]
pub struct SweepFailure {
    /// Points recorded before the abort
    pub partial: ResultSeries,
    /// Planned number of points
    pub total: usize,
    /// What stopped the sweep
    #[source]
    pub error: BodeError,
}

/// What one read of the measurement slots produced
#[derive(Debug, Clone, Copy, PartialEq)]
struct PointReading {
    amplitude_db: Option<f64>,
    phase_deg: Option<f64>,
}

impl PointReading {
    const UNMEASURED: Self = Self {
        amplitude_db: None,
        phase_deg: None,
    };

    fn is_complete(&self) -> bool {
        self.amplitude_db.is_some() && self.phase_deg.is_some()
    }
}

/// Drives one sweep over an exclusively borrowed instrument session
pub struct SweepController<'a, I: BodeInstrument + ?Sized> {
    instrument: &'a mut I,
    settings: SweepSettings,
    observer: Box<dyn SweepObserver + 'a>,
}

impl<'a, I: BodeInstrument + ?Sized> SweepController<'a, I> {
    /// Controller reporting progress through [`TracingObserver`]
    pub fn new(instrument: &'a mut I, settings: SweepSettings) -> Self {
        Self {
            instrument,
            settings,
            observer: Box::new(TracingObserver),
        }
    }

    /// Replace the progress observer
    pub fn with_observer(mut self, observer: impl SweepObserver + 'a) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Run every planned frequency in order.
    ///
    /// # Errors
    /// `SweepFailure` on a communication error or when the deadline elapses.
    pub async fn run(mut self) -> Result<ResultSeries, SweepFailure> {
        let total = self.settings.plan.step_count();
        let mut series = ResultSeries::with_capacity(total);
        let started = Instant::now();

        info!(
            "Starting {} point sweep {:.1} Hz .. {:.1} Hz on {}",
            total,
            self.settings.plan.start_hz(),
            self.settings.plan.stop_hz(),
            self.instrument.describe()
        );

        if let Err(error) = self.prepare().await {
            return Err(abort(series, total, error));
        }

        for index in 0..total {
            if let Some(deadline) = self.settings.deadline {
                if started.elapsed() >= deadline {
                    let error = BodeError::SweepDeadline {
                        completed: index,
                        total,
                    };
                    return Err(abort(series, total, error));
                }
            }

            let frequency_hz = self.settings.plan.frequency_at(index);
            let previous = series.last().copied();
            let point = match self.measure_point(frequency_hz, previous.as_ref()).await {
                Ok(point) => point,
                Err(error) => return Err(abort(series, total, error)),
            };
            series.push(point);
            self.observer.on_point(&SweepProgress {
                index: index + 1,
                total,
                point,
            });
        }

        series.finish();
        info!(
            "Sweep complete: {} points, {} with carried values",
            series.len(),
            series.carried_count()
        );
        Ok(series)
    }

    async fn prepare(&mut self) -> AppResult<()> {
        self.instrument
            .set_stimulus_amplitude(self.settings.stimulus_amplitude_v)
            .await?;
        self.instrument.enable_stimulus().await?;
        self.instrument.sync().await?;
        Ok(())
    }

    async fn measure_point(
        &mut self,
        frequency_hz: f64,
        previous: Option<&FrequencyPoint>,
    ) -> AppResult<FrequencyPoint> {
        self.instrument.set_stimulus_frequency(frequency_hz).await?;
        self.instrument.sync().await?;
        self.instrument
            .set_horizontal_scale(1.0 / frequency_hz)
            .await?;
        self.instrument.sync().await?;

        let mut ranging_failed = false;
        for channel in Channel::ALL {
            if let RangeOutcome::Failed(reason) = self.range_channel(channel).await? {
                warn!("Autoranging failed on {} at {:.1} Hz: {}", channel, frequency_hz, reason);
                ranging_failed = true;
            }
        }

        let reading = if ranging_failed {
            PointReading::UNMEASURED
        } else {
            let mut reading = self.read_point().await?;
            if previous.is_none() {
                let mut attempt = 0;
                while !reading.is_complete() && attempt < self.settings.initial_retries {
                    attempt += 1;
                    debug!("First point incomplete, retry {}", attempt);
                    reading = self.read_point().await?;
                }
            }
            reading
        };

        Ok(resolve_point(frequency_hz, reading, previous, ranging_failed))
    }

    async fn range_channel(&mut self, channel: Channel) -> AppResult<RangeOutcome> {
        let params = self.settings.range_params(channel);
        autorange_within(
            &mut *self.instrument,
            channel,
            &params,
            self.settings.autorange_timeout,
        )
        .await
    }

    async fn read_point(&mut self) -> AppResult<PointReading> {
        tokio::time::sleep(self.settings.settle_delay).await;

        let phase = self.instrument.measurement(MeasurementId::Phase).await?;
        let response = self
            .instrument
            .measurement(MeasurementId::ResponseAmplitude)
            .await?;
        let reference = self
            .instrument
            .measurement(MeasurementId::ReferenceAmplitude)
            .await?;
        self.instrument.sync().await?;

        let amplitude_db = match (response, reference) {
            (Reading::Valid(a1), Reading::Valid(a2)) if a1 > 0.0 && a2 > 0.0 => {
                Some(20.0 * (a1 / a2).log10())
            }
            _ => None,
        };
        Ok(PointReading {
            amplitude_db,
            phase_deg: phase.value().map(|raw| raw - self.settings.phase_offset_deg),
        })
    }
}

fn abort(mut partial: ResultSeries, total: usize, error: BodeError) -> SweepFailure {
    partial.finish();
    warn!("Sweep aborted after {} of {} points: {}", partial.len(), total, error);
    SweepFailure {
        partial,
        total,
        error,
    }
}

/// Fill the gaps of `reading` from `previous`.
///
/// Carried values are copied bit for bit; with no previous point the gap becomes `NaN`.
fn resolve_point(
    frequency_hz: f64,
    reading: PointReading,
    previous: Option<&FrequencyPoint>,
    ranging_failed: bool,
) -> FrequencyPoint {
    let (amplitude_db, amplitude_carried) = match reading.amplitude_db {
        Some(value) => (value, false),
        None => (
            carry(frequency_hz, "amplitude", previous.map(|p| p.amplitude_db)),
            true,
        ),
    };
    let (phase_deg, phase_carried) = match reading.phase_deg {
        Some(value) => (value, false),
        None => (carry(frequency_hz, "phase", previous.map(|p| p.phase_deg)), true),
    };
    FrequencyPoint {
        frequency_hz,
        amplitude_db,
        phase_deg,
        amplitude_carried,
        phase_carried,
        ranging_failed,
    }
}

fn carry(frequency_hz: f64, quantity: &str, previous: Option<f64>) -> f64 {
    match previous {
        Some(value) => {
            warn!(
                "Invalid {} at {:.1} Hz, carrying previous value forward",
                quantity, frequency_hz
            );
            value
        }
        None => {
            warn!(
                "Invalid {} at first point {:.1} Hz, recording placeholder",
                quantity, frequency_hz
            );
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated_scope::{DutModel, SimulatedScope};
    use tracing_test::traced_test;

    fn quick_settings(plan: SweepPlan) -> SweepSettings {
        SweepSettings {
            settle_delay: Duration::ZERO,
            ..SweepSettings::new(plan)
        }
    }

    #[tokio::test]
    async fn test_simulated_sweep_tracks_dut() {
        let plan = SweepPlan::linear(200_000.0, 2_000_000.0, 25).unwrap();
        let mut scope = SimulatedScope::default();
        let dut = scope.dut();

        let series = SweepController::new(&mut scope, quick_settings(plan.clone()))
            .run()
            .await
            .unwrap();

        assert_eq!(series.len(), 25);
        assert_eq!(series.frequencies(), plan.frequencies());
        assert!(series.finished_at().is_some());
        for point in &series {
            assert!(point.is_fully_measured(), "carried at {}", point.frequency_hz);
            assert!((point.amplitude_db - dut.gain_db(point.frequency_hz)).abs() < 1e-9);
            assert!((point.phase_deg - dut.phase_deg(point.frequency_hz)).abs() < 1e-9);
        }
        assert!(scope.stimulus_enabled());
        assert_eq!(scope.frequency_hz(), 2_000_000.0);
        assert!((scope.horizontal_scale() - 5e-7).abs() < 1e-18);
    }

    #[tokio::test]
    async fn test_observer_sees_every_point() {
        let plan = SweepPlan::logarithmic(1_000.0, 100_000.0, 5).unwrap();
        let mut scope = SimulatedScope::new(DutModel::low_pass(0.5, 10_000.0));
        let mut seen = Vec::new();

        let series = SweepController::new(&mut scope, quick_settings(plan))
            .with_observer(|progress: &SweepProgress| seen.push((progress.index, progress.total)))
            .run()
            .await
            .unwrap();

        assert_eq!(series.len(), 5);
        assert_eq!(seen, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ranging_failure_is_recorded_and_sweep_continues() {
        // Scale ceiling far below the 1 Vpp stimulus: CH2 can never stop clipping
        let plan = SweepPlan::linear(1_000.0, 2_000.0, 3).unwrap();
        let mut scope = SimulatedScope::default()
            .with_scales(0.005, 0.005)
            .with_scale_limits(0.001, 0.005);
        let mut settings = quick_settings(plan);
        settings.response.max_iterations = 3;
        settings.reference.max_iterations = 3;

        let series = SweepController::new(&mut scope, settings)
            .run()
            .await
            .unwrap();

        assert_eq!(series.len(), 3);
        for point in &series {
            assert!(point.ranging_failed);
            assert!(point.amplitude_carried && point.phase_carried);
            assert!(point.amplitude_db.is_nan());
        }
        assert!(logs_contain("Autoranging failed"));
        assert!(logs_contain("recording placeholder"));
    }

    #[tokio::test]
    async fn test_communication_error_aborts_with_partial_results() {
        let plan = SweepPlan::linear(1_000.0, 10_000.0, 10).unwrap();
        let mut scope = SimulatedScope::new(DutModel::low_pass(1.0, 5_000.0));
        scope.inject_failure_at_step(4);

        let failure = SweepController::new(&mut scope, quick_settings(plan.clone()))
            .run()
            .await
            .unwrap_err();

        assert!(failure.error.is_communication());
        assert_eq!(failure.total, 10);
        assert_eq!(failure.partial.len(), 4);
        assert_eq!(failure.partial.frequencies(), plan.frequencies()[..4].to_vec());
        assert!(failure.to_string().starts_with("sweep aborted after 4 of 10 points"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_sweep() {
        let plan = SweepPlan::linear(1_000.0, 10_000.0, 10).unwrap();
        let mut scope = SimulatedScope::default();
        let settings = SweepSettings {
            settle_delay: Duration::from_secs(1),
            deadline: Some(Duration::from_millis(2_500)),
            ..SweepSettings::new(plan)
        };

        let failure = SweepController::new(&mut scope, settings)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            BodeError::SweepDeadline {
                completed: 3,
                total: 10
            }
        ));
        assert_eq!(failure.partial.len(), 3);
    }

    #[test]
    fn test_carry_forward_copies_previous_bits() {
        let previous = FrequencyPoint::measured(1_000.0, -3.0103, -45.0);
        let point = resolve_point(
            2_000.0,
            PointReading {
                amplitude_db: None,
                phase_deg: Some(-60.0),
            },
            Some(&previous),
            false,
        );

        assert_eq!(point.amplitude_db.to_bits(), previous.amplitude_db.to_bits());
        assert!(point.amplitude_carried);
        assert_eq!(point.phase_deg, -60.0);
        assert!(!point.phase_carried);
    }

    #[test]
    fn test_first_point_gap_is_placeholder() {
        let point = resolve_point(
            1_000.0,
            PointReading {
                amplitude_db: Some(6.0),
                phase_deg: None,
            },
            None,
            false,
        );

        assert_eq!(point.amplitude_db, 6.0);
        assert!(point.phase_deg.is_nan());
        assert!(point.phase_carried);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = BodeConfig::default();
        config.sweep.deadline_secs = Some(60);
        config.acquisition.phase_offset_deg = 0.0;

        let settings = SweepSettings::from_config(&config).unwrap();
        assert_eq!(settings.plan.step_count(), config.sweep.steps);
        assert_eq!(settings.deadline, Some(Duration::from_secs(60)));
        assert_eq!(settings.phase_offset_deg, 0.0);
        assert_eq!(settings.settle_delay, Duration::from_millis(500));

        config.sweep.steps = 0;
        assert!(matches!(
            SweepSettings::from_config(&config),
            Err(BodeError::InvalidPlan(_))
        ));
    }
}
