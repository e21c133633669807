//! VISA transport for GPIB/USB/Ethernet instruments
//!
//! Wraps the `visa-rs` crate behind the `instrument_visa` feature. Supports
//! resource strings like:
//! - "USB::0x0699::0x052C::Q100002::INSTR" (USBTMC)
//! - "TCPIP0::192.168.1.100::INSTR" (VXI-11 / LXI)
//! - "GPIB0::1::INSTR"
//!
//! VISA I/O is blocking; the sweep issues one request at a time, so calls run
//! inline on the current task. The session timeout is set on open, so every read
//! and write is bounded like the TCP link.

use crate::error::AppResult;
use crate::hardware::scpi_transport::ScpiTransport;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(not(feature = "instrument_visa"))]
use crate::error::BodeError;
#[cfg(feature = "instrument_visa")]
use anyhow::{bail, Context};
#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{BufRead, BufReader, Write};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// SCPI link over a VISA session
pub struct VisaTransport {
    resource: String,
    timeout: Duration,
    #[cfg(feature = "instrument_visa")]
    instrument: Instrument,
}

impl VisaTransport {
    /// Open a VISA resource through the default resource manager.
    ///
    /// `timeout` bounds the open and then every read and write on the session.
    #[cfg(feature = "instrument_visa")]
    pub fn open(resource: &str, timeout: Duration) -> AppResult<Self> {
        let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
        let name = CString::new(resource)
            .with_context(|| format!("Invalid VISA resource string: {}", resource))?;
        let visa_name = VisaString::from(name);
        let mut instrument = rm
            .open(&visa_name.into(), AccessMode::NO_LOCK, timeout)
            .with_context(|| format!("Failed to open VISA resource: {}", resource))?;

        let timeout_ms = timeout_millis(timeout);
        instrument
            .set_timeout(timeout_ms)
            .with_context(|| format!("Failed to set VISA timeout to {}ms", timeout_ms))?;

        debug!("VISA resource '{}' opened ({}ms timeout)", resource, timeout_ms);
        Ok(Self {
            resource: resource.to_string(),
            timeout,
            instrument,
        })
    }

    /// Always fails: VISA support is not compiled in
    #[cfg(not(feature = "instrument_visa"))]
    pub fn open(_resource: &str, _timeout: Duration) -> AppResult<Self> {
        Err(BodeError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    /// VISA resource string this session was opened with
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// I/O timeout applied to the session
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Session timeout in VISA's unit, saturating at the largest finite value
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn write(&mut self, cmd: &str) -> Result<()> {
        let line = format!("{}\n", cmd);
        (&self.instrument)
            .write_all(line.as_bytes())
            .with_context(|| format!("VISA write failed for: {}", cmd))?;
        Ok(())
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        self.write(cmd).await?;
        let mut response = String::new();
        let read = BufReader::new(&self.instrument)
            .read_line(&mut response)
            .with_context(|| format!("VISA read failed for: {}", cmd))?;
        if read == 0 {
            bail!("Empty VISA response for: {}", cmd);
        }
        Ok(response.trim().to_string())
    }

    fn describe(&self) -> String {
        format!(
            "VisaTransport({} @ {}ms timeout)",
            self.resource,
            self.timeout.as_millis()
        )
    }
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn write(&mut self, _cmd: &str) -> Result<()> {
        anyhow::bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    async fn query(&mut self, _cmd: &str) -> Result<String> {
        anyhow::bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    fn describe(&self) -> String {
        format!("VisaTransport({}, disabled)", self.resource)
    }
}
