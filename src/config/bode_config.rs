//! Bode Sweep Configuration using Figment
//!
//! Strongly-typed configuration for one sweep session. Configuration is loaded from:
//! 1. A TOML file (base configuration, default `config/bode.toml`)
//! 2. Environment variables (prefixed with `BODE_`, sections split by `__`)
//!
//! Every key has a default, so an empty file yields the bench setup the sweep was
//! tuned on: 200 kHz to 2 MHz in 100 linear steps, 1 V stimulus into a
//! 50 Ω load, 8-sample averaging.

use crate::sweep::autorange::ChannelRangeParams;
use crate::sweep::plan::Spacing;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed into the config types
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// A value parsed but is out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level sweep configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodeConfig {
    /// `[application]`
    #[serde(default)]
    pub application: ApplicationConfig,
    /// `[instrument]`
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// `[stimulus]`
    #[serde(default)]
    pub stimulus: StimulusConfig,
    /// `[acquisition]`
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// `[sweep]`
    #[serde(default)]
    pub sweep: SweepConfig,
    /// `[autorange]`, with `response` and `reference` subsections
    #[serde(default)]
    pub autorange: AutorangeConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How the session reaches the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process scope and DUT model, no hardware
    Simulated,
    /// Raw SCPI socket (`host:port`)
    Tcp,
    /// VISA resource string (requires the `instrument_visa` feature)
    Visa,
}

/// Instrument connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Link to the instrument
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Socket address for `tcp`, VISA resource string for `visa`, ignored for `simulated`
    #[serde(default)]
    pub resource: String,
    /// Per-operation I/O timeout in milliseconds
    #[serde(default = "default_io_timeout")]
    pub timeout_ms: u64,
}

/// Output impedance the AFG assumes when computing its output level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadImpedance {
    /// 50 Ω termination
    Fifty,
    /// High-impedance input
    HighZ,
}

impl LoadImpedance {
    /// SCPI token for `afg:outp:loa:imped`
    pub fn scpi_token(self) -> &'static str {
        match self {
            LoadImpedance::Fifty => "FIFTY",
            LoadImpedance::HighZ => "HIGHZ",
        }
    }
}

/// Signal generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusConfig {
    /// Stimulus amplitude in volts peak-to-peak
    #[serde(default = "default_amplitude")]
    pub amplitude_v: f64,
    /// Load the generator output is calibrated for
    #[serde(default = "default_load")]
    pub load_impedance: LoadImpedance,
}

/// Acquisition and reading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Number of waveforms averaged per acquisition
    #[serde(default = "default_average_count")]
    pub average_count: u32,
    /// Pause before reading a point, lets the averaged acquisition stabilize
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Subtracted from the raw phase reading (maps 0..360 onto -360..0)
    #[serde(default = "default_phase_offset")]
    pub phase_offset_deg: f64,
    /// Initial CH1 vertical scale (V/div)
    #[serde(default = "default_response_scale")]
    pub response_scale: f64,
    /// Initial CH2 vertical scale (V/div)
    #[serde(default = "default_reference_scale")]
    pub reference_scale: f64,
    /// Extra reading attempts when the first point of a sweep is invalid
    #[serde(default = "default_initial_retries")]
    pub initial_retries: u32,
}

/// Frequency sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// First frequency in Hz
    #[serde(default = "default_start_hz")]
    pub start_hz: f64,
    /// Last frequency in Hz, always visited exactly
    #[serde(default = "default_stop_hz")]
    pub stop_hz: f64,
    /// Number of points, both ends included
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// `linear` or `logarithmic`
    #[serde(default)]
    pub spacing: Spacing,
    /// Abort the sweep when it runs longer than this (unbounded when absent)
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// Autoranging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutorangeConfig {
    /// Upper bound on one channel's ranging at one frequency
    #[serde(default = "default_autorange_timeout")]
    pub timeout_ms: u64,
    /// CH1 ranging
    #[serde(default)]
    pub response: ChannelRangeParams,
    /// CH2 ranging
    #[serde(default)]
    pub reference: ChannelRangeParams,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "Bode Sweep".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Simulated
}

fn default_io_timeout() -> u64 {
    10_000
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_load() -> LoadImpedance {
    LoadImpedance::Fifty
}

fn default_average_count() -> u32 {
    8
}

fn default_settle_ms() -> u64 {
    500
}

fn default_phase_offset() -> f64 {
    360.0
}

fn default_response_scale() -> f64 {
    0.1
}

fn default_reference_scale() -> f64 {
    0.2
}

fn default_initial_retries() -> u32 {
    3
}

fn default_start_hz() -> f64 {
    200_000.0
}

fn default_stop_hz() -> f64 {
    2_000_000.0
}

fn default_steps() -> usize {
    100
}

fn default_autorange_timeout() -> u64 {
    10_000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            resource: String::new(),
            timeout_ms: default_io_timeout(),
        }
    }
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            amplitude_v: default_amplitude(),
            load_impedance: default_load(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            average_count: default_average_count(),
            settle_ms: default_settle_ms(),
            phase_offset_deg: default_phase_offset(),
            response_scale: default_response_scale(),
            reference_scale: default_reference_scale(),
            initial_retries: default_initial_retries(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: default_start_hz(),
            stop_hz: default_stop_hz(),
            steps: default_steps(),
            spacing: Spacing::default(),
            deadline_secs: None,
        }
    }
}

impl Default for AutorangeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_autorange_timeout(),
            response: ChannelRangeParams::default(),
            reference: ChannelRangeParams::default(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl BodeConfig {
    /// Load configuration from `config/bode.toml` and environment variables
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/bode.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error: figment treats it as empty and every key
    /// falls back to its default.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::extract_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse file and environment without validating, for callers that layer
    /// further overrides on top and call [`BodeConfig::validate`] themselves
    pub fn extract_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(ConfigError::LoadError)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BODE_").split("__"))
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for the first failing check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.instrument.transport != TransportKind::Simulated
            && self.instrument.resource.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(format!(
                "Instrument transport '{:?}': 'resource' cannot be empty",
                self.instrument.transport
            )));
        }

        if self.instrument.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "instrument.timeout_ms must be > 0".to_string(),
            ));
        }

        if !(self.stimulus.amplitude_v.is_finite() && self.stimulus.amplitude_v > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid stimulus amplitude {} V. Must be > 0",
                self.stimulus.amplitude_v
            )));
        }

        if self.acquisition.average_count == 0 {
            return Err(ConfigError::ValidationError(
                "acquisition.average_count must be > 0".to_string(),
            ));
        }

        for (name, scale) in [
            ("response_scale", self.acquisition.response_scale),
            ("reference_scale", self.acquisition.reference_scale),
        ] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid acquisition.{} {}. Must be > 0",
                    name, scale
                )));
            }
        }

        self.validate_sweep()?;

        for (name, params) in [
            ("response", &self.autorange.response),
            ("reference", &self.autorange.reference),
        ] {
            params.validate().map_err(|msg| {
                ConfigError::ValidationError(format!("autorange.{}: {}", name, msg))
            })?;
        }

        Ok(())
    }

    fn validate_sweep(&self) -> Result<(), ConfigError> {
        let sweep = &self.sweep;
        if !(sweep.start_hz.is_finite() && sweep.start_hz > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sweep.start_hz {}. Must be > 0",
                sweep.start_hz
            )));
        }
        if !(sweep.stop_hz.is_finite() && sweep.stop_hz > sweep.start_hz) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sweep.stop_hz {}. Must be greater than start_hz ({})",
                sweep.stop_hz, sweep.start_hz
            )));
        }
        if sweep.steps == 0 {
            return Err(ConfigError::ValidationError(
                "sweep.steps must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
