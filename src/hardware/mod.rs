//! Instrument drivers
//!
//! - [`MsoScope`]: SCPI driver for the 2-series MSO and its built-in AFG, over any
//!   [`ScpiTransport`]
//! - [`TcpTransport`] / [`VisaTransport`]: raw socket and VISA links
//! - [`SimulatedScope`]: hardware-free scope with a modelled device under test

pub mod mso_scope;
pub mod scpi_transport;
pub mod simulated_scope;
pub mod visa_transport;

pub use mso_scope::{MsoScope, SessionSetup};
pub use scpi_transport::{ScpiTransport, TcpTransport};
pub use simulated_scope::{DutModel, SimulatedScope};
pub use visa_transport::VisaTransport;
