//! Environment record - ambient sensor readings, one document per user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::history::ENVIRONMENT_HISTORY_CAP;
use crate::model::validate::{validate_humidity, validate_temperature};

/// One submitted reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub notes: String,
}

/// Ambient conditions for one user, keyed remotely by the owner id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(default)]
    pub notes: String,
    pub last_update: Option<DateTime<Utc>>,
    /// Newest-first, capped at [`ENVIRONMENT_HISTORY_CAP`] entries
    #[serde(default)]
    pub history: Vec<Reading>,
}

impl EnvironmentRecord {
    /// The default representation installed on upsert-on-read.
    pub fn empty() -> Self {
        Self {
            temperature: None,
            humidity: None,
            notes: String::new(),
            last_update: None,
            history: Vec::new(),
        }
    }

    /// Most recent readings, newest first, at most `limit` entries.
    pub fn recent_history(&self, limit: usize) -> &[Reading] {
        let end = limit.min(self.history.len()).min(ENVIRONMENT_HISTORY_CAP);
        &self.history[..end]
    }
}

impl Default for EnvironmentRecord {
    fn default() -> Self {
        Self::empty()
    }
}

/// User input for a reading submission.
///
/// Either value may be absent: a notes-only submission updates the current
/// conditions document without appending a history entry.
#[derive(Debug, Clone, Default)]
pub struct ReadingInput {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub notes: String,
}

impl ReadingInput {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            validate_temperature(t)?;
        }
        if let Some(h) = self.humidity {
            validate_humidity(h)?;
        }
        Ok(())
    }

    /// Whether this submission carries a measurable reading.
    pub fn has_reading(&self) -> bool {
        self.temperature.is_some() || self.humidity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(n: i64) -> Reading {
        Reading {
            timestamp: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
            temperature: 72.0,
            humidity: 88.0,
            notes: String::new(),
        }
    }

    #[test]
    fn test_empty_record_shape() {
        let record = EnvironmentRecord::empty();
        assert_eq!(record.temperature, None);
        assert_eq!(record.humidity, None);
        assert_eq!(record.notes, "");
        assert_eq!(record.last_update, None);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_recent_history_limit() {
        let mut record = EnvironmentRecord::empty();
        for n in (0..10).rev() {
            record.history.push(reading(n));
        }
        assert_eq!(record.recent_history(3).len(), 3);
        assert_eq!(record.recent_history(100).len(), 10);
        // Newest first.
        assert_eq!(record.recent_history(1)[0], reading(9));
    }

    #[test]
    fn test_reading_input_validation() {
        let ok = ReadingInput {
            temperature: Some(75.0),
            humidity: Some(85.0),
            notes: "misting twice daily".into(),
        };
        assert!(ok.validate().is_ok());
        assert!(ok.has_reading());

        let out_of_range = ReadingInput {
            temperature: Some(150.0),
            humidity: None,
            notes: String::new(),
        };
        assert!(out_of_range.validate().is_err());

        let notes_only = ReadingInput {
            temperature: None,
            humidity: None,
            notes: "fan on".into(),
        };
        assert!(notes_only.validate().is_ok());
        assert!(!notes_only.has_reading());
    }
}
