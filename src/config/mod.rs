//! Sweep Configuration System
//!
//! This module provides configuration management for Bode sweeps using Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `BODE_`
//! 2. TOML configuration file (default: `config/bode.toml`)
//!
//! # Example
//!
//! ```no_run
//! use bode_sweep::config::BodeConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BodeConfig::load_from("config/bode.toml")?;
//!
//!     println!("App name: {}", config.application.name);
//!     println!("Sweep: {} Hz .. {} Hz", config.sweep.start_hz, config.sweep.stop_hz);
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Any configuration value can be overridden via environment variables with the
//! `BODE_` prefix and the key path separated by double underscores:
//!
//! ```text
//! # Set log level
//! BODE_APPLICATION__LOG_LEVEL=debug
//!
//! # Shorten the sweep
//! BODE_SWEEP__STEPS=20
//!
//! # Talk to a different scope
//! BODE_INSTRUMENT__RESOURCE=192.168.1.77:4000
//! ```

pub mod bode_config;

pub use bode_config::{
    AcquisitionConfig, ApplicationConfig, AutorangeConfig, BodeConfig, ConfigError,
    InstrumentConfig, LoadImpedance, StimulusConfig, SweepConfig, TransportKind,
};
