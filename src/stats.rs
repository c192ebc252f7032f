//! Age-group statistics for a set of dissemination areas.
//!
//! Areas are picked either by points (any area containing any point) or by
//! id, and their age-group rows are summed field by field into one record.
//! Every area is counted at most once per call regardless of how many
//! points or duplicate ids select it.

use crate::store::{StatsStore, StoreError};
use crate::types::{AgeGroups, LngLat, StatsResponse, AGE_GROUP_FIELDS};
use std::collections::BTreeSet;
use tracing::debug;

pub fn get_stats_for_points<S>(store: &S, lnglats: &[LngLat]) -> Result<StatsResponse, StoreError>
where
    S: StatsStore + ?Sized,
{
    if lnglats.is_empty() {
        return Ok(StatsResponse::Empty);
    }

    let geo_codes = resolve_by_points(store, lnglats)?;
    let rows = store.age_groups_for(&geo_codes)?;
    debug!(
        points = lnglats.len(),
        areas = geo_codes.len(),
        rows = rows.len(),
        "aggregating age groups by location"
    );

    Ok(StatsResponse::Aggregate(aggregate(rows.iter().map(|row| &row.age_groups))?))
}

pub fn get_stats_for_area_ids<S>(store: &S, ids: &[String]) -> Result<StatsResponse, StoreError>
where
    S: StatsStore + ?Sized,
{
    if ids.is_empty() {
        return Ok(StatsResponse::Empty);
    }

    let geo_codes = resolve_by_ids(ids);
    let rows = store.age_groups_for(&geo_codes)?;
    debug!(
        ids = ids.len(),
        distinct = geo_codes.len(),
        rows = rows.len(),
        "aggregating age groups by id"
    );

    Ok(StatsResponse::Aggregate(aggregate(rows.iter().map(|row| &row.age_groups))?))
}

/// Union of the areas containing each point.
pub fn resolve_by_points<S>(store: &S, lnglats: &[LngLat]) -> Result<BTreeSet<String>, StoreError>
where
    S: StatsStore + ?Sized,
{
    let mut geo_codes = BTreeSet::new();
    for lnglat in lnglats {
        geo_codes.extend(store.areas_containing(*lnglat)?);
    }
    Ok(geo_codes)
}

pub fn resolve_by_ids(ids: &[String]) -> BTreeSet<String> {
    ids.iter().cloned().collect()
}

/// SQL `SUM` per field: nulls are skipped, and a field with no non-null
/// input stays null. A sum that does not fit in `u64` is an error.
pub fn aggregate<'a>(rows: impl IntoIterator<Item = &'a AgeGroups>) -> Result<AgeGroups, StoreError> {
    let mut sums = AgeGroups::all_null();
    for row in rows {
        for ((sum, value), field) in sums.counts_mut().iter_mut().zip(row.counts()).zip(AGE_GROUP_FIELDS) {
            if let Some(value) = value {
                let total = sum
                    .unwrap_or(0)
                    .checked_add(*value)
                    .ok_or_else(|| StoreError::Query(format!("sum of {field} overflows u64")))?;
                *sum = Some(total);
            }
        }
    }
    Ok(sums)
}
