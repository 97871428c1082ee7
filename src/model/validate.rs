//! Local input validation
//!
//! Runs before any network call; a validation failure never reaches the
//! retry layer. Messages are user-facing strings shown verbatim by the UI.

use std::ops::RangeInclusive;

use crate::error::{Result, SyncError};

/// Accepted temperature range in °F, for both stage events and readings.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=120.0;

/// Accepted relative humidity range in %.
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

pub fn validate_temperature(value: f64) -> Result<()> {
    if !value.is_finite() || !TEMPERATURE_RANGE.contains(&value) {
        return Err(SyncError::Validation(
            "Temperature must be between 0°F and 120°F".into(),
        ));
    }
    Ok(())
}

pub fn validate_humidity(value: f64) -> Result<()> {
    if !value.is_finite() || !HUMIDITY_RANGE.contains(&value) {
        return Err(SyncError::Validation(
            "Humidity must be between 0% and 100%".into(),
        ));
    }
    Ok(())
}
