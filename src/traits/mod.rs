//! Meta-instrument traits
//!
//! Hardware-agnostic interfaces the sweep is written against.

pub mod bode_instrument;

pub use bode_instrument::{
    BodeInstrument, Channel, MeasurementId, Reading, INVALID_MEASUREMENT_SENTINEL,
};
