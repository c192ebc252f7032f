use crate::config::AppConfig;
use crate::store::AreaStore;
use crate::types::{AgeGroups, DisseminationArea, AGE_GROUP_FIELDS, FIELD_COUNT};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

pub fn load_store(config: &AppConfig) -> Result<AreaStore> {
    // 1. Load age-group rows
    let age_groups = load_age_groups(&config.input.age_groups_csv, &config.input.join_column_csv)?;
    info!(rows = age_groups.len(), "loaded age-group rows");

    // 2. Load Geometry (Shapefile or GeoJSON)
    let geometry = &config.input.geometry;
    let extension = geometry.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let areas = match extension.as_str() {
        "shp" => load_shapefile(geometry, &config.input.join_column_shape)?,
        "json" | "geojson" => load_geojson(geometry, &config.input.join_column_shape)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };
    info!(areas = areas.len(), "loaded dissemination area geometry");

    Ok(AreaStore::new(areas, age_groups))
}

/// Reads the age-group table. Blank or non-numeric cells (suppression
/// markers like `x` or `..`) load as null.
pub fn load_age_groups(path: &Path, join_column: &str) -> Result<HashMap<String, AgeGroups>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let join_col_idx = headers.iter().position(|h| h.trim() == join_column)
        .ok_or_else(|| anyhow!("Join column '{}' not found in CSV", join_column))?;

    let field_indices = AGE_GROUP_FIELDS
        .iter()
        .map(|field| {
            headers.iter().position(|h| h.trim() == *field)
                .ok_or_else(|| anyhow!("Column '{}' not found in CSV", field))
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut data_map = HashMap::new();
    let mut null_cells = 0usize;

    for result in rdr.records() {
        let record = result?;
        let geo_code = record.get(join_col_idx).unwrap_or("").trim().to_string();

        if geo_code.is_empty() { continue; }

        let mut counts = [None; FIELD_COUNT];
        for (count, &idx) in counts.iter_mut().zip(&field_indices) {
            *count = parse_count(record.get(idx));
            if count.is_none() {
                null_cells += 1;
            }
        }

        if data_map.insert(geo_code.clone(), AgeGroups::from_counts(counts)).is_some() {
            return Err(anyhow!("Duplicate {} '{}' in CSV", join_column, geo_code));
        }
    }

    if null_cells > 0 {
        warn!(null_cells, "age-group CSV has blank or suppressed cells; loaded as null");
    }

    Ok(data_map)
}

fn parse_count(cell: Option<&str>) -> Option<u64> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn load_shapefile(path: &Path, join_column: &str) -> Result<Vec<DisseminationArea>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut areas = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record.get(join_column)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile", join_column))?;

        let id = match shape_id(id_value)? {
            Some(id) => id,
            None => continue, // Skip if null
        };

        let geometry = match shape {
            shapefile::Shape::Polygon(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?;
                geo_polygon
            },
            shapefile::Shape::PolygonM(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?;
                geo_polygon
            },
            shapefile::Shape::PolygonZ(polygon) => {
                let geo_polygon: MultiPolygon<f64> = polygon.try_into()
                    .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?;
                geo_polygon
            },
            _ => continue, // Skip non-polygon shapes
        };

        areas.push(DisseminationArea { id, geometry });
    }

    Ok(areas)
}

fn shape_id(value: &FieldValue) -> Result<Option<String>> {
    let id = match value {
        FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => Some(format_numeric_id(*n)),
        FieldValue::Float(Some(n)) => Some(format_numeric_id(f64::from(*n))),
        FieldValue::Double(n) => Some(format_numeric_id(*n)),
        FieldValue::Integer(n) => Some(n.to_string()),
        FieldValue::Character(None) | FieldValue::Numeric(None) | FieldValue::Float(None) => None,
        _ => return Err(anyhow!("Shapefile join column must be a string or number")),
    };
    Ok(id)
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => {
            if let Some(n) = n.as_u64() {
                Some(n.to_string())
            } else if let Some(n) = n.as_i64() {
                Some(n.to_string())
            } else {
                n.as_f64().map(format_numeric_id)
            }
        }
        _ => None,
    }
}

// Numeric ids may arrive as floats; DAUIDs are integers.
fn format_numeric_id(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn load_geojson(path: &Path, join_column: &str) -> Result<Vec<DisseminationArea>> {
    use std::io::BufReader;
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut areas = Vec::new();
    let mut skipped = 0usize;

    for feature in collection.features {
        // 1. Get ID
        let id_val = feature.properties.as_ref()
            .and_then(|props| props.get(join_column));

        let id = match id_val.and_then(json_id) {
            Some(id) => id,
            None => {
                skipped += 1;
                continue;
            }
        };

        // 2. Get Geometry
        let geometry = match feature.geometry {
            Some(geo) => {
                let valid_geo: geo::Geometry<f64> = geo.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry for {}: {:?}", id, e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        skipped += 1;
                        continue; // Skip points/lines
                    }
                }
            },
            None => {
                skipped += 1;
                continue;
            }
        };

        areas.push(DisseminationArea { id, geometry });
    }

    if skipped > 0 {
        warn!(skipped, "skipped GeoJSON features without an id or areal geometry");
    }

    Ok(areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, ServerConfig};
    use crate::store::StatsStore;
    use crate::types::LngLat;
    use std::fs;

    fn csv_header() -> String {
        format!("geo_code,{}", AGE_GROUP_FIELDS.join(","))
    }

    fn csv_row(geo_code: &str, total: &str, fill: &str) -> String {
        let mut cells = vec![geo_code.to_string(), total.to_string()];
        cells.extend(std::iter::repeat(fill.to_string()).take(FIELD_COUNT - 1));
        cells.join(",")
    }

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "DAUID": "1001" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "DAUID": 1002 },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "DAUID": "1003" },
                "geometry": { "type": "Point", "coordinates": [1.0, 1.0] }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "no id" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            }
        ]
    }"#;

    #[test]
    fn csv_blank_and_suppressed_cells_are_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ages.csv");
        fs::write(
            &path,
            [csv_header(), csv_row("A", "100", "5"), csv_row("B", "", "x")].join("\n"),
        )
        .unwrap();

        let rows = load_age_groups(&path, "geo_code").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["A"].total(), Some(100));
        assert_eq!(rows["A"].get("age_85_plus"), Some(5));
        assert!(rows["B"].is_all_null());
    }

    #[test]
    fn csv_missing_stat_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ages.csv");
        fs::write(&path, "geo_code,total\nA,10\n").unwrap();

        let err = load_age_groups(&path, "geo_code").unwrap_err();
        assert!(err.to_string().contains("age_0_to_4"));
    }

    #[test]
    fn csv_duplicate_geo_code_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ages.csv");
        fs::write(
            &path,
            [csv_header(), csv_row("A", "1", "0"), csv_row("A", "2", "0")].join("\n"),
        )
        .unwrap();

        let err = load_age_groups(&path, "geo_code").unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn geojson_keeps_areal_features_with_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("areas.geojson");
        fs::write(&path, GEOJSON).unwrap();

        let areas = load_geojson(&path, "DAUID").unwrap();
        let ids: Vec<&str> = areas.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1001", "1002"]);
    }

    #[test]
    fn geojson_must_be_a_feature_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("areas.geojson");
        fs::write(&path, r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#).unwrap();

        assert!(load_geojson(&path, "DAUID").is_err());
    }

    #[test]
    fn load_store_joins_geometry_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = dir.path().join("areas.geojson");
        let csv = dir.path().join("ages.csv");
        fs::write(&geometry, GEOJSON).unwrap();
        // 1002 has geometry but no row; 9999 has a row but no geometry.
        fs::write(&csv, [csv_header(), csv_row("1001", "40", "2"), csv_row("9999", "7", "0")].join("\n"))
            .unwrap();

        let config = AppConfig {
            input: InputConfig {
                geometry,
                age_groups_csv: csv,
                join_column_shape: "DAUID".to_string(),
                join_column_csv: "geo_code".to_string(),
            },
            server: ServerConfig::default(),
        };

        let store = load_store(&config).unwrap();
        assert_eq!(store.area_count(), 2);
        assert_eq!(store.age_group_count(), 2);
        assert_eq!(store.areas_containing(LngLat::new(1.0, 1.0)).unwrap(), vec!["1001"]);
        assert_eq!(store.areas_containing(LngLat::new(5.5, 5.5)).unwrap(), vec!["1002"]);
    }

    #[test]
    fn unsupported_geometry_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("ages.csv");
        fs::write(&csv, csv_header()).unwrap();

        let config = AppConfig {
            input: InputConfig {
                geometry: dir.path().join("areas.kml"),
                age_groups_csv: csv,
                join_column_shape: "DAUID".to_string(),
                join_column_csv: "geo_code".to_string(),
            },
            server: ServerConfig::default(),
        };

        let err = load_store(&config).err().unwrap();
        assert!(err.to_string().contains("Unsupported geometry format"));
    }

    #[test]
    fn geojson_float_id_joins_integer_geo_code() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = dir.path().join("areas.geojson");
        let csv = dir.path().join("ages.csv");
        fs::write(
            &geometry,
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": { "DAUID": 59150001.0 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                    }
                }]
            }"#,
        )
        .unwrap();
        fs::write(&csv, [csv_header(), csv_row("59150001", "5", "5")].join("\n")).unwrap();

        let config = AppConfig {
            input: InputConfig {
                geometry,
                age_groups_csv: csv,
                join_column_shape: "DAUID".to_string(),
                join_column_csv: "geo_code".to_string(),
            },
            server: ServerConfig::default(),
        };

        let store = load_store(&config).unwrap();
        assert_eq!(store.areas_containing(LngLat::new(0.5, 0.5)).unwrap(), vec!["59150001"]);
        let result = crate::stats::get_stats_for_points(&store, &[LngLat::new(0.5, 0.5)]).unwrap();
        assert_eq!(result.aggregate().unwrap().total(), Some(5));
    }

    #[test]
    fn json_ids_normalise_numbers() {
        assert_eq!(json_id(&serde_json::json!("0042")), Some("0042".to_string()));
        assert_eq!(json_id(&serde_json::json!(59150001)), Some("59150001".to_string()));
        assert_eq!(json_id(&serde_json::json!(59150001.0)), Some("59150001".to_string()));
        assert_eq!(json_id(&serde_json::json!(-7)), Some("-7".to_string()));
        assert_eq!(json_id(&serde_json::json!(null)), None);
    }

    #[test]
    fn shape_ids_accept_every_numeric_dbase_type() {
        assert_eq!(shape_id(&FieldValue::Numeric(Some(59150001.0))).unwrap().as_deref(), Some("59150001"));
        assert_eq!(shape_id(&FieldValue::Integer(59150001)).unwrap().as_deref(), Some("59150001"));
        assert_eq!(shape_id(&FieldValue::Double(59150001.0)).unwrap().as_deref(), Some("59150001"));
        assert_eq!(shape_id(&FieldValue::Float(Some(1001.0))).unwrap().as_deref(), Some("1001"));
        assert_eq!(
            shape_id(&FieldValue::Character(Some(" 1001 ".to_string()))).unwrap().as_deref(),
            Some("1001")
        );
        assert_eq!(shape_id(&FieldValue::Character(None)).unwrap(), None);
        assert_eq!(shape_id(&FieldValue::Float(None)).unwrap(), None);
        assert!(shape_id(&FieldValue::Logical(Some(true))).is_err());
    }

    #[test]
    fn numeric_ids_drop_the_decimal_point() {
        assert_eq!(format_numeric_id(59150001.0), "59150001");
        assert_eq!(format_numeric_id(1.5), "1.5");
    }
}
