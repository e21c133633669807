//! Core library for the bode-sweep application.
//!
//! Measures a device's frequency response with a dual-channel oscilloscope and its
//! built-in signal generator. At every frequency both channels are autoranged
//! before amplitude ratio and phase are read, with carry-forward for readings the
//! instrument could not produce.
//!
//! The sweep is written against the [`traits::BodeInstrument`] trait; drivers for
//! real hardware and a simulator live in [`hardware`].

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod sweep;
pub mod traits;

pub use config::BodeConfig;
pub use error::{AppResult, BodeError};
pub use sweep::{
    FrequencyPoint, ResultSeries, SweepController, SweepFailure, SweepPlan, SweepSettings,
};
pub use traits::{BodeInstrument, Channel, MeasurementId, Reading};
