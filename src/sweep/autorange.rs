//! Autorange engine
//!
//! Closed-loop vertical scaling of one channel at one frequency. Two bounded loops
//! run one after another:
//!
//! 1. **Shrink**: while the digitizer clips, set the scale from the measured
//!    amplitude times `clip_shrink`.
//! 2. **Grow precision**: while the trace uses less than `underrange_fraction` of
//!    the screen (`amplitude / (scale * divisions)`), set the scale from the
//!    amplitude times `precision_factor`, stopping at the instrument's scale floor.
//!
//! If either loop changed anything, one settling write of
//! `amplitude * precision_factor` follows. A channel that is already in range on
//! entry gets no command at all. Both loops are capped at `max_iterations`; a
//! channel that does not converge reports a [`RangingFailure`] instead of looping.
//!
//! [`autorange_within`] adds a time budget. It is checked between requests, never
//! by cancelling one, so a late reply is always consumed by the query that asked
//! for it and the session stays in step. The budget can be overrun by at most one
//! adjustment; each request is bounded by the transport's own I/O timeout.

use crate::error::AppResult;
use crate::traits::{BodeInstrument, Channel, Reading};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Relative tolerance when comparing a read-back scale with the floor
const FLOOR_TOLERANCE: f64 = 1e-9;

/// Tuning of one channel's ranging loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelRangeParams {
    /// Vertical divisions on screen
    #[serde(default = "default_divisions")]
    pub divisions: f64,
    /// Fraction of the screen the trace must fill
    #[serde(default = "default_underrange_fraction")]
    pub underrange_fraction: f64,
    /// Smallest scale the instrument supports (units/div)
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    /// New scale = amplitude × this, while clipping
    #[serde(default = "default_clip_shrink")]
    pub clip_shrink: f64,
    /// New scale = amplitude × this, while underranged and when settling
    #[serde(default = "default_precision_factor")]
    pub precision_factor: f64,
    /// Cap on each loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Issue the final settling write after any adjustment
    #[serde(default = "default_settle")]
    pub settle: bool,
}

fn default_divisions() -> f64 {
    8.0
}

fn default_underrange_fraction() -> f64 {
    0.5
}

fn default_min_scale() -> f64 {
    0.001
}

fn default_clip_shrink() -> f64 {
    0.5
}

fn default_precision_factor() -> f64 {
    0.15
}

fn default_max_iterations() -> u32 {
    32
}

fn default_settle() -> bool {
    true
}

impl Default for ChannelRangeParams {
    fn default() -> Self {
        Self {
            divisions: default_divisions(),
            underrange_fraction: default_underrange_fraction(),
            min_scale: default_min_scale(),
            clip_shrink: default_clip_shrink(),
            precision_factor: default_precision_factor(),
            max_iterations: default_max_iterations(),
            settle: default_settle(),
        }
    }
}

impl ChannelRangeParams {
    /// Check parameter ranges, returning a message naming the offending field
    pub fn validate(&self) -> Result<(), String> {
        if !(self.divisions.is_finite() && self.divisions > 0.0) {
            return Err(format!("divisions must be > 0, got {}", self.divisions));
        }
        if !(self.underrange_fraction > 0.0 && self.underrange_fraction <= 1.0) {
            return Err(format!(
                "underrange_fraction must be in (0, 1], got {}",
                self.underrange_fraction
            ));
        }
        if !(self.min_scale.is_finite() && self.min_scale > 0.0) {
            return Err(format!("min_scale must be > 0, got {}", self.min_scale));
        }
        for (name, factor) in [
            ("clip_shrink", self.clip_shrink),
            ("precision_factor", self.precision_factor),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(format!("{} must be in (0, 1), got {}", name, factor));
            }
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Why a channel could not be ranged at this frequency
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangingFailure {
    /// The shrink loop hit its cap with the channel still clipping
    #[error("still clipping after {iterations} scale reductions")]
    PersistentClipping {
        /// Reductions issued
        iterations: u32,
    },

    /// The grow loop hit its cap above the scale floor
    #[error("still underranged after {iterations} scale adjustments")]
    Underrange {
        /// Adjustments issued
        iterations: u32,
    },

    /// The amplitude could not be measured outside of clipping
    #[error("no measurable signal")]
    NoSignal,

    /// The time budget ran out between two requests
    #[error("ranging did not finish within {after:?}")]
    Timeout {
        /// The budget that was exceeded
        after: Duration,
    },
}

/// Final state of a converged channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeReport {
    /// Scale read back after the last adjustment
    pub scale: f64,
    /// Number of scale writes issued, settling write included
    pub adjustments: u32,
    /// Underrange stopped at the scale floor rather than meeting the threshold
    pub floor_limited: bool,
}

/// Result of ranging one channel at one frequency
#[derive(Debug, Clone, PartialEq)]
pub enum RangeOutcome {
    /// The channel is in range, or at the scale floor
    Converged(RangeReport),
    /// Ranging gave up; the channel's readings at this frequency are not trusted
    Failed(RangingFailure),
}

impl RangeOutcome {
    /// True for [`RangeOutcome::Converged`]
    pub fn is_converged(&self) -> bool {
        matches!(self, RangeOutcome::Converged(_))
    }
}

/// Scale and last amplitude of the channel being ranged; lives for one call.
struct ChannelRangeState {
    scale: f64,
    last_amplitude: Reading,
}

impl ChannelRangeState {
    fn fill_fraction(&self, amplitude: f64, params: &ChannelRangeParams) -> f64 {
        amplitude / (self.scale * params.divisions)
    }

    fn at_floor(&self, params: &ChannelRangeParams) -> bool {
        self.scale <= params.min_scale * (1.0 + FLOOR_TOLERANCE)
    }
}

/// Converge `channel`'s vertical scale at the current frequency.
///
/// # Errors
/// Only transport failures are errors; non-convergence is `Ok(RangeOutcome::Failed)`.
pub async fn autorange<I>(
    instrument: &mut I,
    channel: Channel,
    params: &ChannelRangeParams,
) -> AppResult<RangeOutcome>
where
    I: BodeInstrument + ?Sized,
{
    range_channel(instrument, channel, params, None).await
}

/// [`autorange`] that gives up with [`RangingFailure::Timeout`] once `limit` has
/// elapsed.
///
/// # Errors
/// Only transport failures are errors.
pub async fn autorange_within<I>(
    instrument: &mut I,
    channel: Channel,
    params: &ChannelRangeParams,
    limit: Duration,
) -> AppResult<RangeOutcome>
where
    I: BodeInstrument + ?Sized,
{
    let budget = Budget {
        deadline: Instant::now() + limit,
        limit,
    };
    range_channel(instrument, channel, params, Some(budget)).await
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    deadline: Instant,
    limit: Duration,
}

impl Budget {
    fn exhausted(budget: Option<Budget>) -> Option<RangeOutcome> {
        let budget = budget?;
        (Instant::now() >= budget.deadline).then_some(RangeOutcome::Failed(
            RangingFailure::Timeout {
                after: budget.limit,
            },
        ))
    }
}

async fn range_channel<I>(
    instrument: &mut I,
    channel: Channel,
    params: &ChannelRangeParams,
    budget: Option<Budget>,
) -> AppResult<RangeOutcome>
where
    I: BodeInstrument + ?Sized,
{
    let amplitude_id = channel.amplitude_measurement();
    let mut adjustments = 0;

    let mut iterations = 0;
    while instrument.clipping(channel).await? {
        if iterations >= params.max_iterations {
            return Ok(RangeOutcome::Failed(RangingFailure::PersistentClipping {
                iterations,
            }));
        }
        if let Some(timeout) = Budget::exhausted(budget) {
            return Ok(timeout);
        }
        iterations += 1;

        let target = match instrument.measurement(amplitude_id).await? {
            Reading::Valid(amplitude) if amplitude > 0.0 => amplitude * params.clip_shrink,
            // A saturated trace often cannot be measured at all: zoom out instead.
            _ => instrument.channel_scale(channel).await? / params.clip_shrink,
        };
        apply_scale(instrument, channel, target, params).await?;
        adjustments += 1;
    }

    let mut state = ChannelRangeState {
        scale: instrument.channel_scale(channel).await?,
        last_amplitude: instrument.measurement(amplitude_id).await?,
    };
    let mut floor_limited = false;
    let mut iterations = 0;
    loop {
        let amplitude = match state.last_amplitude {
            Reading::Valid(amplitude) if amplitude > 0.0 => amplitude,
            _ => return Ok(RangeOutcome::Failed(RangingFailure::NoSignal)),
        };
        if state.scale > 0.0 && state.fill_fraction(amplitude, params) >= params.underrange_fraction
        {
            break;
        }
        if state.at_floor(params) {
            floor_limited = true;
            break;
        }
        if iterations >= params.max_iterations {
            return Ok(RangeOutcome::Failed(RangingFailure::Underrange { iterations }));
        }
        if let Some(timeout) = Budget::exhausted(budget) {
            return Ok(timeout);
        }
        iterations += 1;

        apply_scale(
            instrument,
            channel,
            amplitude * params.precision_factor,
            params,
        )
        .await?;
        adjustments += 1;
        state.scale = instrument.channel_scale(channel).await?;
        state.last_amplitude = instrument.measurement(amplitude_id).await?;
    }

    if adjustments > 0 && params.settle {
        if let Some(timeout) = Budget::exhausted(budget) {
            return Ok(timeout);
        }
        if let Reading::Valid(amplitude) = state.last_amplitude {
            apply_scale(
                instrument,
                channel,
                amplitude * params.precision_factor,
                params,
            )
            .await?;
            adjustments += 1;
            state.scale = instrument.channel_scale(channel).await?;
        }
    }

    debug!(
        %channel,
        scale = state.scale,
        adjustments,
        floor_limited,
        "channel ranged"
    );
    Ok(RangeOutcome::Converged(RangeReport {
        scale: state.scale,
        adjustments,
        floor_limited,
    }))
}

async fn apply_scale<I>(
    instrument: &mut I,
    channel: Channel,
    target: f64,
    params: &ChannelRangeParams,
) -> AppResult<()>
where
    I: BodeInstrument + ?Sized,
{
    let scale = target.max(params.min_scale);
    debug!(%channel, scale, "setting vertical scale");
    instrument.set_channel_scale(channel, scale).await?;
    instrument.sync().await?;
    Ok(())
}
