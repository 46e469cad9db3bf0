use crate::config::AppConfig;
use crate::projection::{planar_centroid, reproject, Crs};
use crate::types::{Neighborhood, StreetLocation, StreetTable};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::{CoordsIter, MultiPolygon, Point};
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

// Cell values read as missing, as in pandas' default na_values
const NA_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN", "<NA>", "N/A",
    "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

struct RawFeature {
    id: u32, // 1-based position in the file, counting skipped features
    name: String,
    geometry: MultiPolygon<f64>,
}

pub fn load_neighborhoods(config: &AppConfig) -> Result<Vec<Neighborhood>> {
    let path = &config.input.neighborhoods;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Neighborhood file has no extension: {:?}", path))?;

    let features = match extension.as_str() {
        "shp" => read_shapefile(config)?,
        "json" | "geojson" => read_geojson(config)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    if features.is_empty() {
        return Err(anyhow!("No polygon features found in {:?}", path));
    }

    let source = source_crs(config, &extension)?;
    let planar = Crs::from_epsg(config.map.planar_crs)?;
    debug!(source = source.epsg(), planar = planar.epsg(), "Computing centroids");

    let neighborhoods = features
        .into_iter()
        .map(|feature| -> Result<Neighborhood> {
            let RawFeature { id, name, geometry } = feature;
            let geographic = reproject(&geometry, source, Crs::Geographic);
            if !geographic.coords_iter().all(|c| is_geographic(c.x, c.y)) {
                return Err(anyhow!(
                    "Neighborhood {} ({}) falls outside longitude/latitude range when read as EPSG:{}; \
                     set input.source_crs to the file's CRS",
                    id,
                    name,
                    source.epsg()
                ));
            }
            let centroid = planar_centroid(&geometry, source, planar)
                .ok_or_else(|| anyhow!("Neighborhood {} ({}) has no centroid", id, name))?;
            Ok(Neighborhood {
                id,
                name,
                geometry: geographic,
                centroid,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(count = neighborhoods.len(), "Loaded neighborhoods");
    Ok(neighborhoods)
}

fn is_geographic(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && lon.abs() <= 180.0 && lat.abs() <= 90.0
}

// An explicit input.source_crs wins over the shapefile's .prj; GeoJSON is lon/lat
fn source_crs(config: &AppConfig, extension: &str) -> Result<Crs> {
    let configured = config.input.source_crs.map(Crs::from_epsg).transpose()?;
    let detected = match extension {
        "shp" => read_prj(&config.input.neighborhoods),
        _ => Ok(None),
    };

    match (configured, detected) {
        (Some(configured), Ok(Some(found))) if found != configured => {
            warn!(
                configured = configured.epsg(),
                prj = found.epsg(),
                "input.source_crs disagrees with the .prj file, using the configured CRS"
            );
            Ok(configured)
        }
        (Some(configured), Err(e)) => {
            warn!("Ignoring .prj, input.source_crs is set: {:#}", e);
            Ok(configured)
        }
        (Some(configured), Ok(_)) => Ok(configured),
        (None, detected) => Ok(detected?.unwrap_or(Crs::Geographic)),
    }
}

fn read_prj(shp: &Path) -> Result<Option<Crs>> {
    let prj = shp.with_extension("prj");
    if !prj.exists() {
        debug!("No .prj next to {:?}", shp);
        return Ok(None);
    }
    let wkt = fs::read_to_string(&prj).with_context(|| format!("Failed to read projection file: {:?}", prj))?;
    let crs = Crs::from_wkt(&wkt).with_context(|| format!("Cannot use projection file {:?}", prj))?;
    debug!(epsg = crs.epsg(), "Read CRS from .prj");
    Ok(Some(crs))
}

fn read_shapefile(config: &AppConfig) -> Result<Vec<RawFeature>> {
    let path = &config.input.neighborhoods;
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut features = Vec::new();

    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.with_context(|| format!("Failed to read Shapefile: {:?}", path))?;
        let id = index as u32 + 1;

        let name = match record.get(&config.input.name_column) {
            Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
            Some(FieldValue::Character(None)) => String::new(),
            Some(FieldValue::Numeric(Some(n))) => n.to_string(),
            Some(other) => {
                return Err(anyhow!(
                    "Shapefile column '{}' must be text, got {:?}",
                    config.input.name_column,
                    other
                ))
            }
            None => return Err(anyhow!("Column '{}' not found in Shapefile", config.input.name_column)),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            other => {
                debug!("Skipping non-polygon shape {:?}", other.shapetype());
                continue;
            }
        };

        features.push(RawFeature { id, name, geometry });
    }

    Ok(features)
}

fn read_geojson(config: &AppConfig) -> Result<Vec<RawFeature>> {
    use geojson::GeoJson;

    let path = &config.input.neighborhoods;
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut features = Vec::new();

    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = index as u32 + 1;
        let name = match feature
            .properties
            .as_ref()
            .and_then(|props| props.get(&config.input.name_column))
        {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Null) => String::new(),
            Some(other) => {
                return Err(anyhow!(
                    "GeoJSON property '{}' must be text, got {}",
                    config.input.name_column,
                    other
                ))
            }
            None => return Err(anyhow!("Property '{}' not found in GeoJSON feature", config.input.name_column)),
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let geom: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                match geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        debug!(name = %name, "Skipping non-polygon feature");
                        continue;
                    }
                }
            }
            None => continue,
        };

        features.push(RawFeature { id, name, geometry });
    }

    Ok(features)
}

/// Rows with a missing or non-finite latitude or longitude are dropped;
/// a missing or malformed weight is an error.
pub fn load_street_data(config: &AppConfig) -> Result<(Vec<StreetLocation>, StreetTable)> {
    let input = &config.input;
    let file = File::open(&input.streets)
        .with_context(|| format!("Failed to open CSV file: {:?}", input.streets))?;
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV {:?}", name, input.streets))
    };
    let lat_idx = column(&input.latitude_column)?;
    let lon_idx = column(&input.longitude_column)?;
    let weight_idx = column(&input.weight_column)?;

    let mut locations = Vec::new();
    let mut table = StreetTable::default();
    let mut dropped = 0usize;

    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", row + 1))?;

        let latitude = parse_coordinate(record.get(lat_idx), &input.latitude_column, row)?;
        let longitude = parse_coordinate(record.get(lon_idx), &input.longitude_column, row)?;
        let (latitude, longitude) = match (latitude, longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                dropped += 1;
                continue;
            }
        };

        let raw_weight = record.get(weight_idx).unwrap_or("");
        let weight: f64 = raw_weight.parse().with_context(|| {
            format!("Invalid {} '{}' in CSV row {}", input.weight_column, raw_weight, row + 1)
        })?;

        table.latitude.push(latitude);
        table.longitude.push(longitude);
        table.weight.push(weight);
        locations.push(StreetLocation {
            latitude,
            longitude,
            weight,
            point: Point::new(longitude, latitude),
        });
    }

    if dropped > 0 {
        info!(dropped, "Dropped rows with missing coordinates");
    }
    info!(count = locations.len(), "Loaded street locations");

    Ok((locations, table))
}

fn parse_coordinate(raw: Option<&str>, column: &str, row: usize) -> Result<Option<f64>> {
    let raw = raw.unwrap_or("");
    if raw.is_empty() || NA_TOKENS.contains(&raw) {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .with_context(|| format!("Invalid {} '{}' in CSV row {}", column, raw, row + 1))?;
    Ok(value.is_finite().then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use shapefile::dbase::{Record, TableWriterBuilder};
    use shapefile::PolygonRing;

    const TWO_SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"PRI_NEIGH": "Loop"},
             "geometry": {"type": "Polygon", "coordinates": [[[-87.64, 41.87], [-87.62, 41.87], [-87.62, 41.89], [-87.64, 41.89], [-87.64, 41.87]]]}},
            {"type": "Feature", "properties": {"PRI_NEIGH": "Marker"},
             "geometry": {"type": "Point", "coordinates": [-87.6, 41.8]}},
            {"type": "Feature", "properties": {"PRI_NEIGH": "Hyde Park"},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[-87.61, 41.78], [-87.58, 41.78], [-87.58, 41.81], [-87.61, 41.81], [-87.61, 41.78]]]]}}
        ]
    }"#;

    // The Loop, in NAD83 / Illinois East US feet
    const FEET_SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"PRI_NEIGH": "Loop"},
             "geometry": {"type": "Polygon", "coordinates": [[[1173090, 1895981], [1178477, 1895981], [1178477, 1903313], [1173090, 1903313], [1173090, 1895981]]]}}
        ]
    }"#;

    const ILLINOIS_EAST_FEET_PRJ: &str = r#"PROJCS["NAD_1983_StatePlane_Illinois_East_FIPS_1201_Feet",GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",984250.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",-88.33333333333333],PARAMETER["Scale_Factor",0.999975],PARAMETER["Latitude_Of_Origin",36.66666666666666],UNIT["Foot_US",0.3048006096012192]]"#;

    fn feet_square(x0: f64, y0: f64, x1: f64, y1: f64) -> shapefile::Polygon {
        shapefile::Polygon::new(PolygonRing::Outer(vec![
            shapefile::Point::new(x0, y0),
            shapefile::Point::new(x0, y1),
            shapefile::Point::new(x1, y1),
            shapefile::Point::new(x1, y0),
            shapefile::Point::new(x0, y0),
        ]))
    }

    // Loop, an unnamed row, and Hyde Park with a numeric AREA_NUM column
    fn write_neighborhood_shapefile(path: &Path) {
        let table = TableWriterBuilder::new()
            .add_character_field("PRI_NEIGH".try_into().unwrap(), 40)
            .add_numeric_field("AREA_NUM".try_into().unwrap(), 10, 0);
        let mut writer = shapefile::Writer::from_path(path, table).unwrap();

        let rows = [
            (Some("Loop"), 32.0, feet_square(1_173_090.0, 1_895_981.0, 1_178_477.0, 1_903_313.0)),
            (None, 33.0, feet_square(1_176_000.0, 1_880_000.0, 1_180_000.0, 1_884_000.0)),
            (Some("Hyde Park"), 41.0, feet_square(1_181_538.0, 1_863_252.0, 1_189_624.0, 1_874_255.0)),
        ];
        for (name, area, polygon) in &rows {
            let mut record = Record::default();
            record.insert("PRI_NEIGH".to_string(), FieldValue::Character(name.map(str::to_string)));
            record.insert("AREA_NUM".to_string(), FieldValue::Numeric(Some(*area)));
            writer.write_shape_and_record(polygon, &record).unwrap();
        }
    }

    fn config_in(dir: &Path, geojson: &str, csv: &str) -> AppConfig {
        let hoods = dir.join("hoods.geojson");
        let streets = dir.join("streets.csv");
        fs::write(&hoods, geojson).unwrap();
        fs::write(&streets, csv).unwrap();
        AppConfig::new(hoods, streets, dir.join("map.png"))
    }

    #[test]
    fn ids_follow_file_order_across_skipped_points() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), TWO_SQUARES, "Latitude,Longitude,Weight\n");

        let hoods = load_neighborhoods(&config).unwrap();
        assert_eq!(hoods.len(), 2);
        assert_eq!(hoods[0].id, 1);
        assert_eq!(hoods[0].name, "Loop");
        assert_eq!(hoods[1].id, 3);
        assert_eq!(hoods[1].name, "Hyde Park");
        assert_abs_diff_eq!(hoods[0].centroid.x(), -87.63, epsilon = 1e-4);
        assert_abs_diff_eq!(hoods[0].centroid.y(), 41.88, epsilon = 1e-4);
    }

    #[test]
    fn missing_name_property_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path(), TWO_SQUARES, "Latitude,Longitude,Weight\n");
        config.input.name_column = "COMMUNITY".to_string();
        assert!(load_neighborhoods(&config).is_err());
    }

    #[test]
    fn projected_geojson_read_as_degrees_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), FEET_SQUARE, "Latitude,Longitude,Weight\n");
        let err = load_neighborhoods(&config).unwrap_err();
        assert!(err.to_string().contains("outside longitude/latitude range"));
    }

    #[test]
    fn configured_source_crs_reads_feet() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path(), FEET_SQUARE, "Latitude,Longitude,Weight\n");
        config.input.source_crs = Some(3435);

        let hoods = load_neighborhoods(&config).unwrap();
        assert_abs_diff_eq!(hoods[0].centroid.x(), -87.63, epsilon = 1e-3);
        assert_abs_diff_eq!(hoods[0].centroid.y(), 41.88, epsilon = 1e-3);
    }

    #[test]
    fn shapefile_uses_prj_and_dbf_names() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("hoods.shp");
        write_neighborhood_shapefile(&shp);
        fs::write(dir.path().join("hoods.prj"), ILLINOIS_EAST_FEET_PRJ).unwrap();
        let config = AppConfig::new(&shp, dir.path().join("streets.csv"), dir.path().join("map.png"));

        let hoods = load_neighborhoods(&config).unwrap();
        assert_eq!(hoods.len(), 3);
        assert_eq!(hoods.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(hoods[0].name, "Loop");
        assert_eq!(hoods[1].name, "");
        assert_eq!(hoods[2].name, "Hyde Park");
        assert_abs_diff_eq!(hoods[0].centroid.x(), -87.63, epsilon = 1e-3);
        assert_abs_diff_eq!(hoods[0].centroid.y(), 41.88, epsilon = 1e-3);
        assert_abs_diff_eq!(hoods[2].centroid.x(), -87.595, epsilon = 1e-3);
        assert_abs_diff_eq!(hoods[2].centroid.y(), 41.795, epsilon = 1e-3);
        for c in hoods[0].geometry.coords_iter() {
            assert!((-87.65..-87.61).contains(&c.x) && (41.86..41.90).contains(&c.y));
        }
    }

    #[test]
    fn shapefile_numeric_name_column_is_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("hoods.shp");
        write_neighborhood_shapefile(&shp);
        let mut config = AppConfig::new(&shp, dir.path().join("streets.csv"), dir.path().join("map.png"));
        config.input.source_crs = Some(3435);
        config.input.name_column = "AREA_NUM".to_string();

        let hoods = load_neighborhoods(&config).unwrap();
        assert_eq!(hoods[0].name, "32");
        assert_eq!(hoods[2].name, "41");
    }

    #[test]
    fn shapefile_without_prj_is_read_as_degrees() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("hoods.shp");
        write_neighborhood_shapefile(&shp);
        let config = AppConfig::new(&shp, dir.path().join("streets.csv"), dir.path().join("map.png"));
        assert!(load_neighborhoods(&config).is_err());
    }

    #[test]
    fn shapefile_missing_name_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let shp = dir.path().join("hoods.shp");
        write_neighborhood_shapefile(&shp);
        fs::write(dir.path().join("hoods.prj"), ILLINOIS_EAST_FEET_PRJ).unwrap();
        let mut config = AppConfig::new(&shp, dir.path().join("streets.csv"), dir.path().join("map.png"));
        config.input.name_column = "COMMUNITY".to_string();

        let err = load_neighborhoods(&config).unwrap_err();
        assert!(err.to_string().contains("Column 'COMMUNITY' not found"));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let config = AppConfig::new("hoods.kml", "streets.csv", "map.png");
        let err = load_neighborhoods(&config).unwrap_err();
        assert!(err.to_string().contains("Unsupported geometry format"));
    }

    #[test]
    fn drops_rows_without_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let csv = "Street,Latitude,Longitude,Weight\n\
                   Halsted,41.85,-87.64,3\n\
                   Unknown,,-87.60,2\n\
                   Western,41.90,NaN,5\n\
                   Pulaski,NA,-87.72,2\n\
                   Cicero,41.9,N/A,1\n\
                   Kedzie,NULL,-87.70,4\n\
                   Ashland,41.88,-87.66,7\n\
                   Lake Shore,41.90,inf,6\n\
                   Damen,-infinity,-87.67,8\n";
        let config = config_in(dir.path(), TWO_SQUARES, csv);

        let (locations, table) = load_street_data(&config).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.weight, vec![3.0, 7.0]);
        assert_eq!(locations[1].point.x(), -87.66);
        assert_eq!(locations[1].point.y(), 41.88);
    }

    #[test]
    fn missing_weight_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), TWO_SQUARES, "Latitude,Longitude\n41.8,-87.6\n");
        let err = load_street_data(&config).unwrap_err();
        assert!(err.to_string().contains("Weight"));
    }

    #[test]
    fn malformed_coordinate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), TWO_SQUARES, "Latitude,Longitude,Weight\nnorth,-87.6,1\n");
        assert!(load_street_data(&config).is_err());
    }
}
