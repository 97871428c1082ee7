//! Grow entity - one cultivation attempt
//!
//! The document key (server id or local placeholder) lives outside the
//! struct, in the projection; the remote document itself carries only the
//! fields below.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SyncError};
use crate::session::UserId;

/// Lifecycle stage of a grow.
///
/// Users may jump to any stage; the enumeration order is informational, not
/// enforced. Serialized labels match the stored documents exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GrowStage {
    Inoculation,
    #[serde(rename = "Incubation/Colonization")]
    Colonization,
    #[serde(rename = "Fruiting Conditions")]
    FruitingConditions,
    Pinning,
    Fruiting,
    Harvesting,
    #[serde(rename = "Spore Printing/Cloning")]
    SporePrinting,
    #[serde(rename = "Substrate Recycling")]
    SubstrateRecycling,
}

impl GrowStage {
    /// All stages, in lifecycle order.
    pub const ALL: [GrowStage; 8] = [
        GrowStage::Inoculation,
        GrowStage::Colonization,
        GrowStage::FruitingConditions,
        GrowStage::Pinning,
        GrowStage::Fruiting,
        GrowStage::Harvesting,
        GrowStage::SporePrinting,
        GrowStage::SubstrateRecycling,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GrowStage::Inoculation => "Inoculation",
            GrowStage::Colonization => "Incubation/Colonization",
            GrowStage::FruitingConditions => "Fruiting Conditions",
            GrowStage::Pinning => "Pinning",
            GrowStage::Fruiting => "Fruiting",
            GrowStage::Harvesting => "Harvesting",
            GrowStage::SporePrinting => "Spore Printing/Cloning",
            GrowStage::SubstrateRecycling => "Substrate Recycling",
        }
    }
}

impl fmt::Display for GrowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry in a grow's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub timestamp: DateTime<Utc>,
    pub stage: GrowStage,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

/// One cultivation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Grow {
    /// Immutable once set; always the acting user at creation
    pub owner_id: UserId,
    pub species: String,
    pub stage: GrowStage,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    /// Newest-first, unbounded, append-only
    #[serde(default)]
    pub history: Vec<StageEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Grow {
    /// Whole days elapsed since the start date.
    pub fn days_since_start(&self, today: NaiveDate) -> i64 {
        (today - self.start_date).num_days().max(0)
    }
}

/// User input for a new grow, validated before the optimistic insert.
#[derive(Debug, Clone)]
pub struct GrowDraft {
    pub species: String,
    pub stage: GrowStage,
    pub start_date: NaiveDate,
    pub notes: String,
}

impl GrowDraft {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.species.trim().is_empty() {
            return Err(SyncError::Validation("Species is required".into()));
        }
        if self.start_date > today {
            return Err(SyncError::Validation(
                "Start date cannot be in the future".into(),
            ));
        }
        Ok(())
    }
}
