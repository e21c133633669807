//! 2-series MSO driver
//!
//! Maps the `BodeInstrument` capability set onto the SCPI command set of a
//! Tektronix 2-series MSO with its built-in AFG:
//!
//! | Operation | Command |
//! |---|---|
//! | stimulus frequency / amplitude / enable | `afg:freq`, `afg:ampl`, `afg:outp:state ON` |
//! | timebase | `hor:sca` |
//! | vertical scale | `CH<n>:sca`, `CH<n>:SCAle?` |
//! | clipping | `CH<n>:CLIPping?` |
//! | measurement | `MEASUrement:MEAS<k>:value?` |
//! | sync | `*OPC?` |
//!
//! Wiring expected by [`MsoScope::initialize`]: AFG out to the DUT input and to
//! CH2, DUT output to CH1 (use a 50 Ω feed-through on CH1 at high frequency).

use crate::config::{BodeConfig, LoadImpedance};
use crate::hardware::scpi_transport::ScpiTransport;
use crate::traits::{BodeInstrument, Channel, MeasurementId, Reading};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// One-time session configuration applied before a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    /// Waveforms per averaged acquisition
    pub average_count: u32,
    /// Starting CH1 scale (V/div)
    pub response_scale: f64,
    /// Starting CH2 scale (V/div)
    pub reference_scale: f64,
    /// AFG output load
    pub load_impedance: LoadImpedance,
}

impl SessionSetup {
    /// Setup from the `[acquisition]` and `[stimulus]` sections
    pub fn from_config(config: &BodeConfig) -> Self {
        Self {
            average_count: config.acquisition.average_count,
            response_scale: config.acquisition.response_scale,
            reference_scale: config.acquisition.reference_scale,
            load_impedance: config.stimulus.load_impedance,
        }
    }
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self::from_config(&BodeConfig::default())
    }
}

/// SCPI driver for one MSO session
pub struct MsoScope<T: ScpiTransport> {
    transport: T,
    identity: Option<String>,
}

impl<T: ScpiTransport> MsoScope<T> {
    /// Wrap an open link; nothing is sent until the first command
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            identity: None,
        }
    }

    /// `*IDN?` response captured by `initialize`
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The underlying link
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Reset the scope and set up channels, acquisition, measurements and AFG.
    pub async fn initialize(&mut self, setup: &SessionSetup) -> Result<()> {
        self.write("header OFF").await?;
        self.write("*RST").await?;
        self.write("*CLS").await?;

        let identity = self.query("*IDN?").await?;
        info!("Connected to {}", identity);
        self.identity = Some(identity);

        self.write("DISplay:WAVEView1:VIEWStyle OVERLAY").await?;
        self.write("SELect:CH2 1").await?;

        for (channel, scale) in [
            (Channel::Response, setup.response_scale),
            (Channel::Reference, setup.reference_scale),
        ] {
            let n = channel.number();
            self.write(&format!("CH{}:sca {}", n, scale)).await?;
            self.write(&format!("CH{}:PROBEFunc:EXTAtten 1", n)).await?;
        }

        self.write("acquire:mode AVErage").await?;
        self.write(&format!("acquire:numavg {}", setup.average_count))
            .await?;

        self.write("CH1:COUPling AC").await?;
        self.write("CH2:COUPling AC").await?;
        self.write("trig:a:edge:sou CH2").await?;

        self.write("MEASUrement:MEAS1:TYPe AMPLITUDE").await?;
        self.write("MEASUrement:MEAS1:SOUrce CH1").await?;
        self.write("MEASUrement:MEAS1:state on").await?;

        self.write("MEASUrement:MEAS2:TYPe PHASE").await?;
        self.write("MEASUrement:MEAS2:SOUrce1 CH1").await?;
        self.write("MEASUrement:MEAS2:SOUrce2 CH2").await?;
        self.write("MEASUrement:MEAS2:state on").await?;

        self.write("MEASUrement:MEAS3:TYPe AMPLITUDE").await?;
        self.write("MEASUrement:MEAS3:SOUrce CH2").await?;
        self.write("MEASUrement:MEAS3:state on").await?;

        self.write(&format!(
            "afg:outp:loa:imped {}",
            setup.load_impedance.scpi_token()
        ))
        .await?;
        self.write("afg:func SINE").await?;
        self.sync().await
    }

    async fn write(&mut self, cmd: &str) -> Result<()> {
        debug!("SCPI write: {}", cmd);
        self.transport
            .write(cmd)
            .await
            .with_context(|| format!("SCPI write failed for: {}", cmd))
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        let response = self
            .transport
            .query(cmd)
            .await
            .with_context(|| format!("SCPI query failed for: {}", cmd))?;
        debug!("SCPI query '{}' -> '{}'", cmd, response);
        Ok(response)
    }

    async fn query_f64(&mut self, cmd: &str) -> Result<f64> {
        let response = self.query(cmd).await?;
        response
            .trim()
            .parse::<f64>()
            .map_err(|e| anyhow!("Unparseable response '{}' to {}: {}", response, cmd, e))
    }
}

#[async_trait]
impl<T: ScpiTransport> BodeInstrument for MsoScope<T> {
    async fn set_stimulus_frequency(&mut self, hz: f64) -> Result<()> {
        self.write(&format!("afg:freq {}", hz)).await
    }

    async fn set_stimulus_amplitude(&mut self, volts: f64) -> Result<()> {
        self.write(&format!("afg:ampl {}", volts)).await
    }

    async fn enable_stimulus(&mut self) -> Result<()> {
        self.write("afg:outp:state ON").await
    }

    async fn set_horizontal_scale(&mut self, seconds_per_division: f64) -> Result<()> {
        self.write(&format!("hor:sca {}", seconds_per_division))
            .await
    }

    async fn set_channel_scale(&mut self, channel: Channel, units_per_division: f64) -> Result<()> {
        self.write(&format!("CH{}:sca {}", channel.number(), units_per_division))
            .await
    }

    async fn channel_scale(&mut self, channel: Channel) -> Result<f64> {
        self.query_f64(&format!("CH{}:SCAle?", channel.number()))
            .await
    }

    async fn clipping(&mut self, channel: Channel) -> Result<bool> {
        let flag = self
            .query_f64(&format!("CH{}:CLIPping?", channel.number()))
            .await?;
        Ok(flag != 0.0)
    }

    async fn measurement(&mut self, id: MeasurementId) -> Result<Reading> {
        let raw = self
            .query_f64(&format!("MEASUrement:MEAS{}:value?", id.slot()))
            .await?;
        Ok(Reading::from_raw(raw))
    }

    async fn sync(&mut self) -> Result<()> {
        let response = self.query("*OPC?").await?;
        if response.trim() != "1" {
            return Err(anyhow!("Unexpected *OPC? response: '{}'", response));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.identity {
            Some(identity) => format!("MsoScope({}, {})", identity, self.transport.describe()),
            None => format!("MsoScope({})", self.transport.describe()),
        }
    }
}
