//! BodeInstrument meta-instrument trait
//!
//! Hardware-agnostic capability set a frequency-response sweep needs from a
//! dual-channel scope with a built-in (or slaved) signal generator.
//! Implementations handle the wire protocol; the sweep only sees these operations.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Magic value the instrument returns when it cannot compute a measurement
/// (channel out of range, no trigger, no signal).
pub const INVALID_MEASUREMENT_SENTINEL: f64 = 9.91e37;

/// Measurement channels of the scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// CH1, connected to the output of the device under test
    Response,
    /// CH2, connected to the generator output (stimulus reference)
    Reference,
}

impl Channel {
    /// Both channels in ranging order.
    pub const ALL: [Channel; 2] = [Channel::Response, Channel::Reference];

    /// Scope channel number (1-based)
    pub fn number(self) -> u8 {
        match self {
            Channel::Response => 1,
            Channel::Reference => 2,
        }
    }

    /// The amplitude measurement sourced from this channel
    pub fn amplitude_measurement(self) -> MeasurementId {
        match self {
            Channel::Response => MeasurementId::ResponseAmplitude,
            Channel::Reference => MeasurementId::ReferenceAmplitude,
        }
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.number())
    }
}

/// Measurements the sweep reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementId {
    /// Peak-to-peak amplitude of CH1 (MEAS1)
    ResponseAmplitude,
    /// Phase of CH1 relative to CH2, 0..360 degrees (MEAS2)
    Phase,
    /// Peak-to-peak amplitude of CH2 (MEAS3)
    ReferenceAmplitude,
}

impl MeasurementId {
    /// Measurement slot on the instrument (1-based)
    pub fn slot(self) -> u8 {
        match self {
            MeasurementId::ResponseAmplitude => 1,
            MeasurementId::Phase => 2,
            MeasurementId::ReferenceAmplitude => 3,
        }
    }
}

/// Result of a measurement query.
///
/// The raw sentinel is converted at the driver boundary so it can never be
/// mistaken for a real value further down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// A measured value
    Valid(f64),
    /// The instrument returned its sentinel
    Invalid,
}

impl Reading {
    /// Classify a raw numeric response.
    ///
    /// The sentinel, anything at or beyond its magnitude, and non-finite values are
    /// all `Invalid`.
    pub fn from_raw(raw: f64) -> Self {
        if raw.is_finite() && raw.abs() < INVALID_MEASUREMENT_SENTINEL {
            Reading::Valid(raw)
        } else {
            Reading::Invalid
        }
    }

    /// The value, if valid
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Valid(v) => Some(v),
            Reading::Invalid => None,
        }
    }

    /// True for [`Reading::Valid`]
    pub fn is_valid(self) -> bool {
        matches!(self, Reading::Valid(_))
    }
}

/// Bode sweep meta-instrument trait
///
/// ## Session Model
/// - Every method takes `&mut self`: one session is driven by exactly one
///   controller, and requests never overlap
/// - Configuration calls return once the command is *sent*; only `sync()`
///   guarantees it has taken effect
///
/// ## Errors
/// - Any `Err` is a transport-level failure (timeout, disconnect, unparseable
///   response) and aborts the sweep
/// - A measurement the instrument cannot compute is *not* an error: it is
///   `Ok(Reading::Invalid)`
#[async_trait]
pub trait BodeInstrument: Send {
    /// Set generator frequency in Hz
    async fn set_stimulus_frequency(&mut self, hz: f64) -> Result<()>;

    /// Set generator amplitude in volts peak-to-peak
    async fn set_stimulus_amplitude(&mut self, volts: f64) -> Result<()>;

    /// Turn the generator output on
    async fn enable_stimulus(&mut self) -> Result<()>;

    /// Set timebase in seconds per division
    async fn set_horizontal_scale(&mut self, seconds_per_division: f64) -> Result<()>;

    /// Set a channel's vertical scale in units per division
    async fn set_channel_scale(&mut self, channel: Channel, units_per_division: f64)
        -> Result<()>;

    /// Read back a channel's vertical scale.
    ///
    /// May differ from the last value set when the instrument clamps or rounds.
    async fn channel_scale(&mut self, channel: Channel) -> Result<f64>;

    /// True when the channel input exceeds its digitization range
    async fn clipping(&mut self, channel: Channel) -> Result<bool>;

    /// Read a computed measurement
    async fn measurement(&mut self, id: MeasurementId) -> Result<Reading>;

    /// Block until all previously issued commands have taken effect (*OPC?)
    async fn sync(&mut self) -> Result<()>;

    /// Short human-readable description for diagnostics
    fn describe(&self) -> String;
}
