//! Common test utilities for bode-sweep integration tests
//!
//! `ScriptedScope` is a `BodeInstrument` whose readings come from closures over
//! the scope's current state, so a test can script exactly what each frequency
//! step returns and then inspect every scale write the sweep issued.

#![allow(dead_code)] // Not every test file uses every helper

use anyhow::{bail, Result};
use async_trait::async_trait;
use bode_sweep::traits::{BodeInstrument, Channel, MeasurementId, Reading};
use std::collections::VecDeque;
use std::time::Duration;

/// What a script can see when asked for a reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeState {
    /// 0-based frequency step (number of frequency changes minus one)
    pub step: usize,
    pub frequency_hz: f64,
    pub scales: [f64; 2],
    /// Phase reads at this step; the sweep reads phase first after settling
    pub phase_reads: usize,
}

impl ScopeState {
    pub fn scale(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Response => self.scales[0],
            Channel::Reference => self.scales[1],
        }
    }

    /// True once the post-ranging reading at this step has started
    pub fn settled(&self) -> bool {
        self.phase_reads > 0
    }
}

pub type Script = Box<dyn FnMut(&ScopeState) -> Reading + Send>;

pub struct ScriptedScope {
    state: ScopeState,
    floor: f64,
    clipping: [VecDeque<bool>; 2],
    always_clipping: [bool; 2],
    response: Script,
    reference: Script,
    phase: Script,
    fail_at_step: Option<usize>,
    sync_delay: Duration,
    frequency_changes: usize,
    scale_writes: Vec<(usize, Channel, f64)>,
}

impl ScriptedScope {
    /// Constant readings; starting scales keep both channels in range
    pub fn constant(response: f64, reference: f64, phase: f64) -> Self {
        Self {
            state: ScopeState {
                step: 0,
                frequency_hz: 0.0,
                scales: [0.3, 0.15],
                phase_reads: 0,
            },
            floor: 0.001,
            clipping: [VecDeque::new(), VecDeque::new()],
            always_clipping: [false, false],
            response: Box::new(move |_| Reading::Valid(response)),
            reference: Box::new(move |_| Reading::Valid(reference)),
            phase: Box::new(move |_| Reading::Valid(phase)),
            fail_at_step: None,
            sync_delay: Duration::ZERO,
            frequency_changes: 0,
            scale_writes: Vec::new(),
        }
    }

    pub fn with_response(mut self, script: impl FnMut(&ScopeState) -> Reading + Send + 'static) -> Self {
        self.response = Box::new(script);
        self
    }

    pub fn with_reference(mut self, script: impl FnMut(&ScopeState) -> Reading + Send + 'static) -> Self {
        self.reference = Box::new(script);
        self
    }

    pub fn with_phase(mut self, script: impl FnMut(&ScopeState) -> Reading + Send + 'static) -> Self {
        self.phase = Box::new(script);
        self
    }

    pub fn with_scales(mut self, response: f64, reference: f64) -> Self {
        self.state.scales = [response, reference];
        self
    }

    /// Answers for the next clipping queries on `channel`, then `false`
    pub fn with_clipping(mut self, channel: Channel, answers: &[bool]) -> Self {
        self.clipping[index(channel)] = answers.iter().copied().collect();
        self
    }

    pub fn always_clipping(mut self, channel: Channel) -> Self {
        self.always_clipping[index(channel)] = true;
        self
    }

    /// Fail the `step`-th (0-based) frequency change
    pub fn fail_at_step(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    /// Make every `sync` take this long
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    pub fn scale(&self, channel: Channel) -> f64 {
        self.state.scale(channel)
    }

    /// Scale writes issued for `channel` while at `step`
    pub fn writes_at(&self, step: usize, channel: Channel) -> Vec<f64> {
        self.scale_writes
            .iter()
            .filter(|(s, ch, _)| *s == step && *ch == channel)
            .map(|(_, _, scale)| *scale)
            .collect()
    }

    pub fn total_writes(&self) -> usize {
        self.scale_writes.len()
    }
}

fn index(channel: Channel) -> usize {
    match channel {
        Channel::Response => 0,
        Channel::Reference => 1,
    }
}

#[async_trait]
impl BodeInstrument for ScriptedScope {
    async fn set_stimulus_frequency(&mut self, hz: f64) -> Result<()> {
        let step = self.frequency_changes;
        self.frequency_changes += 1;
        if self.fail_at_step == Some(step) {
            bail!("scripted link failure at step {}", step);
        }
        self.state.step = step;
        self.state.frequency_hz = hz;
        self.state.phase_reads = 0;
        Ok(())
    }

    async fn set_stimulus_amplitude(&mut self, _volts: f64) -> Result<()> {
        Ok(())
    }

    async fn enable_stimulus(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set_horizontal_scale(&mut self, _seconds_per_division: f64) -> Result<()> {
        Ok(())
    }

    async fn set_channel_scale(&mut self, channel: Channel, units_per_division: f64) -> Result<()> {
        self.scale_writes
            .push((self.state.step, channel, units_per_division));
        self.state.scales[index(channel)] = units_per_division.max(self.floor);
        Ok(())
    }

    async fn channel_scale(&mut self, channel: Channel) -> Result<f64> {
        Ok(self.state.scale(channel))
    }

    async fn clipping(&mut self, channel: Channel) -> Result<bool> {
        let i = index(channel);
        Ok(self.always_clipping[i] || self.clipping[i].pop_front().unwrap_or(false))
    }

    async fn measurement(&mut self, id: MeasurementId) -> Result<Reading> {
        Ok(match id {
            MeasurementId::Phase => {
                self.state.phase_reads += 1;
                (self.phase)(&self.state)
            }
            MeasurementId::ResponseAmplitude => (self.response)(&self.state),
            MeasurementId::ReferenceAmplitude => (self.reference)(&self.state),
        })
    }

    async fn sync(&mut self) -> Result<()> {
        if !self.sync_delay.is_zero() {
            tokio::time::sleep(self.sync_delay).await;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "ScriptedScope".to_string()
    }
}
