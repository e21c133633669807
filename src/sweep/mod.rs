//! Frequency sweep: plan, per-channel autoranging, orchestration, and results.
//!
//! [`SweepController`] owns the instrument session for the duration of a run and
//! drives [`autorange`] for both channels at every frequency of a [`SweepPlan`],
//! producing a [`ResultSeries`].

pub mod autorange;
pub mod controller;
pub mod plan;
pub mod results;

pub use autorange::{
    autorange, autorange_within, ChannelRangeParams, RangeOutcome, RangeReport, RangingFailure,
};
pub use controller::{
    SweepController, SweepFailure, SweepObserver, SweepProgress, SweepSettings, TracingObserver,
};
pub use plan::{Spacing, SweepPlan};
pub use results::{FrequencyPoint, ResultSeries};
