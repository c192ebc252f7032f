use geo::MultiPolygon;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

/// Stat columns in output order. `total` first, then the 18 age bands.
/// These names are the wire contract for both CSV headers and JSON keys.
pub const AGE_GROUP_FIELDS: [&str; 19] = [
    "total",
    "age_0_to_4",
    "age_5_to_9",
    "age_10_to_14",
    "age_15_to_19",
    "age_20_to_24",
    "age_25_to_29",
    "age_30_to_34",
    "age_35_to_39",
    "age_40_to_44",
    "age_45_to_49",
    "age_50_to_54",
    "age_55_to_59",
    "age_60_to_64",
    "age_65_to_69",
    "age_70_to_74",
    "age_75_to_79",
    "age_80_to_84",
    "age_85_plus",
];

pub const FIELD_COUNT: usize = AGE_GROUP_FIELDS.len();

/// A longitude/latitude pair in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

#[derive(Debug, Clone)]
pub struct DisseminationArea {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

/// Population counts keyed by [`AGE_GROUP_FIELDS`]. `None` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgeGroups {
    counts: [Option<u64>; FIELD_COUNT],
}

impl AgeGroups {
    pub fn from_counts(counts: [Option<u64>; FIELD_COUNT]) -> Self {
        Self { counts }
    }

    /// Every field null. This is also what a sum over zero rows yields.
    pub fn all_null() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Option<u64> {
        self.counts[0]
    }

    pub fn get(&self, field: &str) -> Option<u64> {
        AGE_GROUP_FIELDS
            .iter()
            .position(|name| *name == field)
            .and_then(|idx| self.counts[idx])
    }

    pub fn counts(&self) -> &[Option<u64>; FIELD_COUNT] {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut [Option<u64>; FIELD_COUNT] {
        &mut self.counts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<u64>)> + '_ {
        AGE_GROUP_FIELDS.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn is_all_null(&self) -> bool {
        self.counts.iter().all(Option::is_none)
    }
}

impl Serialize for AgeGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// One row of the age-group table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeGroupRecord {
    pub geo_code: String,
    pub age_groups: AgeGroups,
}

/// Result of a stats query.
///
/// `Empty` is returned only when the caller passed no points or no ids and
/// serialises as `[]`. A non-empty input that matches no age-group rows
/// still yields `Aggregate` with every field null. The two cases are kept
/// distinct because existing clients tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsResponse {
    Empty,
    Aggregate(AgeGroups),
}

impl StatsResponse {
    pub fn aggregate(&self) -> Option<&AgeGroups> {
        match self {
            Self::Empty => None,
            Self::Aggregate(groups) => Some(groups),
        }
    }
}

impl Serialize for StatsResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_seq(Some(0))?.end(),
            Self::Aggregate(groups) => groups.serialize(serializer),
        }
    }
}
