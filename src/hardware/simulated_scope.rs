//! Simulated scope and device under test
//!
//! Provides a `BodeInstrument` that runs without hardware. It models:
//! - A first-order low-pass DUT between the generator and CH1
//! - Per-channel vertical scale clamped to the instrument's limits
//! - A 10-division digitizer: a trace wider than `10 × scale` clips, and its
//!   amplitude then reads as the digitizer span
//! - Traces under 2% of a division are unmeasurable (`Reading::Invalid`)
//! - Phase reported in the instrument's 0..360° convention
//!
//! Like the mock adapters it keeps a call log and supports failure injection,
//! so tests can check exactly what the sweep sent.

use crate::traits::{BodeInstrument, Channel, MeasurementId, Reading};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

/// Divisions the digitizer can represent before clipping
const DIGITIZER_DIVISIONS: f64 = 10.0;

/// Smallest trace, in divisions, the amplitude measurement can resolve
const MIN_MEASURABLE_DIVISIONS: f64 = 0.02;

/// First-order low-pass: `gain = dc_gain / sqrt(1 + (f/fc)^2)`, `phase = -atan(f/fc)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutModel {
    /// Passband gain (V/V)
    pub dc_gain: f64,
    /// -3 dB frequency
    pub corner_hz: f64,
}

impl DutModel {
    /// First-order low-pass with the given passband gain and corner
    pub fn low_pass(dc_gain: f64, corner_hz: f64) -> Self {
        Self { dc_gain, corner_hz }
    }

    /// Linear gain at `frequency_hz`
    pub fn gain(&self, frequency_hz: f64) -> f64 {
        let ratio = frequency_hz / self.corner_hz;
        self.dc_gain / (1.0 + ratio * ratio).sqrt()
    }

    /// Gain in dB, what a sweep should measure
    pub fn gain_db(&self, frequency_hz: f64) -> f64 {
        20.0 * self.gain(frequency_hz).log10()
    }

    /// Phase in degrees, what a sweep should measure with the default offset
    pub fn phase_deg(&self, frequency_hz: f64) -> f64 {
        -(frequency_hz / self.corner_hz).atan().to_degrees()
    }
}

impl Default for DutModel {
    /// RC low-pass with its corner inside the default sweep range
    fn default() -> Self {
        Self::low_pass(1.0, 800_000.0)
    }
}

/// Simulated dual-channel scope with internal generator
pub struct SimulatedScope {
    dut: DutModel,
    frequency_hz: f64,
    stimulus_v: f64,
    stimulus_on: bool,
    horizontal_scale: f64,
    scales: [f64; 2],
    min_scale: f64,
    max_scale: f64,
    frequency_steps: usize,
    fail_next: bool,
    fail_at_step: Option<usize>,
    sync_count: usize,
    call_log: Vec<String>,
}

impl Default for SimulatedScope {
    fn default() -> Self {
        Self::new(DutModel::default())
    }
}

impl SimulatedScope {
    /// Scope in its power-on state: generator off at 1 kHz, 0.1 V/div on CH1 and
    /// 0.2 V/div on CH2
    pub fn new(dut: DutModel) -> Self {
        Self {
            dut,
            frequency_hz: 1_000.0,
            stimulus_v: 1.0,
            stimulus_on: false,
            horizontal_scale: 1e-3,
            scales: [0.1, 0.2],
            min_scale: 0.001,
            max_scale: 10.0,
            frequency_steps: 0,
            fail_next: false,
            fail_at_step: None,
            sync_count: 0,
            call_log: Vec::new(),
        }
    }

    /// Set both channels' starting scales
    pub fn with_scales(mut self, response: f64, reference: f64) -> Self {
        self.scales = [response, reference];
        self
    }

    /// Clamp every scale write to `min_scale..=max_scale`
    pub fn with_scale_limits(mut self, min_scale: f64, max_scale: f64) -> Self {
        self.min_scale = min_scale;
        self.max_scale = max_scale;
        self
    }

    /// The modelled device
    pub fn dut(&self) -> DutModel {
        self.dut
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&mut self) {
        self.fail_next = true;
    }

    /// Fail the `step`-th (0-based) `set_stimulus_frequency` call
    pub fn inject_failure_at_step(&mut self, step: usize) {
        self.fail_at_step = Some(step);
    }

    /// Every instrument call so far, in order
    pub fn call_log(&self) -> &[String] {
        &self.call_log
    }

    /// Number of `sync` calls
    pub fn sync_count(&self) -> usize {
        self.sync_count
    }

    /// Current vertical scale of `channel`
    pub fn scale(&self, channel: Channel) -> f64 {
        self.scales[channel.index()]
    }

    /// Current generator frequency
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Current timebase (s/div)
    pub fn horizontal_scale(&self) -> f64 {
        self.horizontal_scale
    }

    /// Generator output is on
    pub fn stimulus_enabled(&self) -> bool {
        self.stimulus_on
    }

    fn log_call(&mut self, call: String) -> Result<()> {
        self.call_log.push(call);
        if std::mem::take(&mut self.fail_next) {
            bail!("Injected failure");
        }
        Ok(())
    }

    /// Peak-to-peak voltage at the channel input
    fn signal_vpp(&self, channel: Channel) -> f64 {
        if !self.stimulus_on {
            return 0.0;
        }
        match channel {
            Channel::Reference => self.stimulus_v,
            Channel::Response => self.stimulus_v * self.dut.gain(self.frequency_hz),
        }
    }

    fn is_clipping(&self, channel: Channel) -> bool {
        self.signal_vpp(channel) > self.scale(channel) * DIGITIZER_DIVISIONS
    }

    fn amplitude(&self, channel: Channel) -> Reading {
        let scale = self.scale(channel);
        let signal = self.signal_vpp(channel);
        if signal < scale * MIN_MEASURABLE_DIVISIONS {
            Reading::Invalid
        } else {
            Reading::Valid(signal.min(scale * DIGITIZER_DIVISIONS))
        }
    }

    fn phase(&self) -> Reading {
        let measurable = Channel::ALL
            .iter()
            .all(|&ch| !self.is_clipping(ch) && self.amplitude(ch).is_valid());
        if measurable {
            Reading::Valid(self.dut.phase_deg(self.frequency_hz).rem_euclid(360.0))
        } else {
            Reading::Invalid
        }
    }
}

#[async_trait]
impl BodeInstrument for SimulatedScope {
    async fn set_stimulus_frequency(&mut self, hz: f64) -> Result<()> {
        self.log_call(format!("set_stimulus_frequency {}", hz))?;
        let step = self.frequency_steps;
        self.frequency_steps += 1;
        if self.fail_at_step == Some(step) {
            return Err(anyhow!("Injected failure at frequency step {}", step));
        }
        if !(hz.is_finite() && hz > 0.0) {
            bail!("Frequency out of range: {}", hz);
        }
        self.frequency_hz = hz;
        Ok(())
    }

    async fn set_stimulus_amplitude(&mut self, volts: f64) -> Result<()> {
        self.log_call(format!("set_stimulus_amplitude {}", volts))?;
        self.stimulus_v = volts;
        Ok(())
    }

    async fn enable_stimulus(&mut self) -> Result<()> {
        self.log_call("enable_stimulus".to_string())?;
        self.stimulus_on = true;
        Ok(())
    }

    async fn set_horizontal_scale(&mut self, seconds_per_division: f64) -> Result<()> {
        self.log_call(format!("set_horizontal_scale {}", seconds_per_division))?;
        self.horizontal_scale = seconds_per_division;
        Ok(())
    }

    async fn set_channel_scale(&mut self, channel: Channel, units_per_division: f64) -> Result<()> {
        self.log_call(format!("set_channel_scale {} {}", channel, units_per_division))?;
        self.scales[channel.index()] = units_per_division.clamp(self.min_scale, self.max_scale);
        Ok(())
    }

    async fn channel_scale(&mut self, channel: Channel) -> Result<f64> {
        self.log_call(format!("channel_scale {}", channel))?;
        Ok(self.scale(channel))
    }

    async fn clipping(&mut self, channel: Channel) -> Result<bool> {
        self.log_call(format!("clipping {}", channel))?;
        Ok(self.is_clipping(channel))
    }

    async fn measurement(&mut self, id: MeasurementId) -> Result<Reading> {
        self.log_call(format!("measurement MEAS{}", id.slot()))?;
        Ok(match id {
            MeasurementId::ResponseAmplitude => self.amplitude(Channel::Response),
            MeasurementId::ReferenceAmplitude => self.amplitude(Channel::Reference),
            MeasurementId::Phase => self.phase(),
        })
    }

    async fn sync(&mut self) -> Result<()> {
        self.log_call("sync".to_string())?;
        self.sync_count += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "SimulatedScope(low-pass, gain {} @ fc {} Hz)",
            self.dut.dc_gain, self.dut.corner_hz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::autorange::{autorange, ChannelRangeParams};

    #[test]
    fn test_dut_model_at_corner() {
        let dut = DutModel::low_pass(1.0, 1_000.0);
        assert!((dut.gain_db(1_000.0) + 3.0103).abs() < 1e-3);
        assert!((dut.phase_deg(1_000.0) + 45.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clipping_follows_scale() {
        let mut scope = SimulatedScope::default();
        scope.enable_stimulus().await.unwrap();

        // 1 Vpp on 0.05 V/div spans 20 divisions
        scope.set_channel_scale(Channel::Reference, 0.05).await.unwrap();
        assert!(scope.clipping(Channel::Reference).await.unwrap());
        assert_eq!(
            scope.measurement(MeasurementId::ReferenceAmplitude).await.unwrap(),
            Reading::Valid(0.5)
        );
        assert_eq!(
            scope.measurement(MeasurementId::Phase).await.unwrap(),
            Reading::Invalid
        );

        scope.set_channel_scale(Channel::Reference, 0.2).await.unwrap();
        assert!(!scope.clipping(Channel::Reference).await.unwrap());
    }

    #[tokio::test]
    async fn test_phase_uses_instrument_convention() {
        let mut scope = SimulatedScope::new(DutModel::low_pass(1.0, 1_000.0));
        scope.enable_stimulus().await.unwrap();
        scope.set_stimulus_frequency(1_000.0).await.unwrap();
        scope.set_channel_scale(Channel::Response, 0.1).await.unwrap();
        scope.set_channel_scale(Channel::Reference, 0.15).await.unwrap();

        let raw = scope.measurement(MeasurementId::Phase).await.unwrap();
        let value = raw.value().unwrap();
        assert!((value - 315.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tiny_trace_is_unmeasurable() {
        let mut scope = SimulatedScope::default();
        // Generator off: no signal on either channel
        assert_eq!(
            scope.measurement(MeasurementId::ResponseAmplitude).await.unwrap(),
            Reading::Invalid
        );
    }

    #[tokio::test]
    async fn test_autorange_converges_on_model() {
        let mut scope = SimulatedScope::default().with_scales(0.01, 0.01);
        scope.enable_stimulus().await.unwrap();
        let params = ChannelRangeParams::default();

        for channel in Channel::ALL {
            let outcome = autorange(&mut scope, channel, &params).await.unwrap();
            assert!(outcome.is_converged(), "{} did not converge", channel);
            assert!(!scope.clipping(channel).await.unwrap());
            let amplitude = scope
                .measurement(channel.amplitude_measurement())
                .await
                .unwrap()
                .value()
                .unwrap();
            let fill = amplitude / (scope.scale(channel) * params.divisions);
            assert!(fill >= params.underrange_fraction, "fill {} on {}", fill, channel);
        }
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mut scope = SimulatedScope::default();
        scope.inject_next_failure();
        assert!(scope.sync().await.is_err());
        // Failure should be consumed
        assert!(scope.sync().await.is_ok());
        assert_eq!(scope.sync_count(), 1);
        assert_eq!(scope.call_log(), ["sync", "sync"]);
    }

    #[tokio::test]
    async fn test_scale_is_clamped_to_limits() {
        let mut scope = SimulatedScope::default();
        scope.set_channel_scale(Channel::Response, 1e-6).await.unwrap();
        assert_eq!(scope.scale(Channel::Response), 0.001);
        scope.set_channel_scale(Channel::Response, 50.0).await.unwrap();
        assert_eq!(scope.scale(Channel::Response), 10.0);
    }
}
