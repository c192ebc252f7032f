use crate::types::{AgeGroupRecord, AgeGroups, DisseminationArea, LngLat};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Read-only access to dissemination-area geometry and age-group rows.
pub trait StatsStore {
    /// Ids of every area whose geometry contains `point`.
    fn areas_containing(&self, point: LngLat) -> Result<Vec<String>, StoreError>;

    /// Age-group rows whose `geo_code` is in `geo_codes`. Codes without a row
    /// are silently absent from the result.
    fn age_groups_for(&self, geo_codes: &BTreeSet<String>) -> Result<Vec<AgeGroupRecord>, StoreError>;
}

// Wrapper for RTree indexing
struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// In-memory store: areas behind a bounding-box R-tree plus a
/// `geo_code -> AgeGroups` table. Immutable once built.
pub struct AreaStore {
    areas: Vec<DisseminationArea>,
    tree: RTree<AreaIndex>,
    age_groups: HashMap<String, AgeGroups>,
}

impl AreaStore {
    pub fn new(areas: Vec<DisseminationArea>, age_groups: HashMap<String, AgeGroups>) -> Self {
        // Empty geometries have no bounding rect and can't contain anything.
        let tree_items: Vec<AreaIndex> = areas
            .par_iter()
            .enumerate()
            .filter_map(|(index, area)| {
                let rect = area.geometry.bounding_rect()?;
                Some(AreaIndex {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        let tree = RTree::bulk_load(tree_items);
        info!(
            areas = areas.len(),
            indexed = tree.size(),
            age_group_rows = age_groups.len(),
            "area store ready"
        );

        Self { areas, tree, age_groups }
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn age_group_count(&self) -> usize {
        self.age_groups.len()
    }
}

impl StatsStore for AreaStore {
    fn areas_containing(&self, point: LngLat) -> Result<Vec<String>, StoreError> {
        let envelope = AABB::from_point([point.lng, point.lat]);
        let geo_point = Point::new(point.lng, point.lat);

        let mut ids: Vec<String> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.areas.get(candidate.index))
            .filter(|area| area.geometry.contains(&geo_point))
            .map(|area| area.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn age_groups_for(&self, geo_codes: &BTreeSet<String>) -> Result<Vec<AgeGroupRecord>, StoreError> {
        Ok(geo_codes
            .iter()
            .filter_map(|geo_code| {
                self.age_groups.get(geo_code).map(|age_groups| AgeGroupRecord {
                    geo_code: geo_code.clone(),
                    age_groups: *age_groups,
                })
            })
            .collect())
    }
}
