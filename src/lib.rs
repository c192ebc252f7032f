//! Age-band population statistics for census dissemination areas.
//!
//! Areas are selected by containing point or by id and their age-group
//! rows summed into one record. See [`stats`] for the query entry points.

pub mod types;
pub mod config;
pub mod data;
pub mod store;
pub mod stats;
pub mod server;

pub use stats::{get_stats_for_area_ids, get_stats_for_points};
pub use store::{AreaStore, StatsStore, StoreError};
pub use types::{AgeGroups, LngLat, StatsResponse, AGE_GROUP_FIELDS};
