//! Domain types for the grow journal
//!
//! Two entities live in the remote document store: [`Grow`] (one cultivation
//! attempt, keyed by a server-assigned id) and [`EnvironmentRecord`] (one per
//! user, keyed by the owner id). Validation happens here, locally, before
//! anything touches the network.

pub mod environment;
pub mod grow;
pub mod validate;

pub use environment::{EnvironmentRecord, Reading, ReadingInput};
pub use grow::{Grow, GrowDraft, GrowStage, StageEvent};
pub use validate::{validate_humidity, validate_temperature, HUMIDITY_RANGE, TEMPERATURE_RANGE};
