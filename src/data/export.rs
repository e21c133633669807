//! Result series writers with clean feature flag handling.
use crate::error::AppResult;
use crate::sweep::results::ResultSeries;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Column order of the CSV export
pub const CSV_HEADER: [&str; 6] = [
    "frequency_hz",
    "amplitude_db",
    "phase_deg",
    "amplitude_carried",
    "phase_carried",
    "ranging_failed",
];

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;

    /// Write one row per point under [`CSV_HEADER`]
    pub fn write_csv(series: &ResultSeries, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        for point in series {
            writer.write_record(&[
                point.frequency_hz.to_string(),
                point.amplitude_db.to_string(),
                point.phase_deg.to_string(),
                point.amplitude_carried.to_string(),
                point.phase_carried.to_string(),
                point.ranging_failed.to_string(),
            ])?;
        }
        writer.flush()?;
        info!("Wrote {} points to '{}'", series.len(), path.display());
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::BodeError;

    /// Always fails: CSV support is not compiled in
    pub fn write_csv(_series: &ResultSeries, _path: &Path) -> AppResult<()> {
        Err(BodeError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::write_csv;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::write_csv;

// ============================================================================
// JSON Writer
// ============================================================================

/// Pretty JSON of the whole series, timestamps included.
///
/// JSON has no NaN, so placeholder values are written as `null` and read back as
/// `NaN`.
pub fn write_json(series: &ResultSeries, path: &Path) -> AppResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, series)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!("Wrote {} points to '{}'", series.len(), path.display());
    Ok(())
}
