use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub map: MapConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub neighborhoods: PathBuf, // .shp, .json or .geojson
    pub streets: PathBuf,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    #[serde(default = "default_latitude_column")]
    pub latitude_column: String,
    #[serde(default = "default_longitude_column")]
    pub longitude_column: String,
    #[serde(default = "default_weight_column")]
    pub weight_column: String,
    // Overrides the CRS found in a shapefile's .prj sidecar
    #[serde(default)]
    pub source_crs: Option<u32>,
}

// Text sizes in points, marker sizes as areas in points squared
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub title: String,
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: u32,
    pub min_marker_size: f64,
    pub max_marker_size: f64,
    pub marker_alpha: f64,
    pub bw_adjust: f64,
    pub heatmap_alpha: f64,
    pub density_levels: usize,
    pub density_thresh: f64,
    pub density_gridsize: usize,
    pub density_cut: f64,
    pub scale_bar_km: f64,
    pub scale_bar_latitude: f64,
    pub planar_crs: u32,
    pub font: Option<PathBuf>,
    pub attribution: Vec<String>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            title: "Chicago PD Season 9 Story Locations".to_string(),
            width_in: 14.0,
            height_in: 12.0,
            dpi: 300,
            min_marker_size: 20.0,
            max_marker_size: 120.0,
            marker_alpha: 0.7,
            bw_adjust: 0.7,
            heatmap_alpha: 0.6,
            density_levels: 10,
            density_thresh: 0.05,
            density_gridsize: 200,
            density_cut: 3.0,
            scale_bar_km: 10.0,
            scale_bar_latitude: 41.88,
            planar_crs: 26971,
            font: None,
            attribution: vec![
                "Datasource:".to_string(),
                "1. Chicago Data Portal: https://data.cityofchicago.org".to_string(),
                "2. Wikipedia: https://en.wikipedia.org/wiki/Community_areas_in_Chicago".to_string(),
                String::new(),
                "© Tamas Rozsahegyi".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub image: PathBuf,
}

fn default_name_column() -> String {
    "PRI_NEIGH".to_string()
}

fn default_latitude_column() -> String {
    "Latitude".to_string()
}

fn default_longitude_column() -> String {
    "Longitude".to_string()
}

fn default_weight_column() -> String {
    "Weight".to_string()
}

impl AppConfig {
    pub fn new(neighborhoods: impl Into<PathBuf>, streets: impl Into<PathBuf>, image: impl Into<PathBuf>) -> Self {
        Self {
            input: InputConfig {
                neighborhoods: neighborhoods.into(),
                streets: streets.into(),
                name_column: default_name_column(),
                latitude_column: default_latitude_column(),
                longitude_column: default_longitude_column(),
                weight_column: default_weight_column(),
                source_crs: None,
            },
            map: MapConfig::default(),
            output: OutputConfig { image: image.into() },
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let map = &self.map;
        if !(map.min_marker_size.is_finite() && map.max_marker_size.is_finite())
            || map.min_marker_size < 0.0
            || map.min_marker_size > map.max_marker_size
        {
            return Err(anyhow!(
                "Invalid marker size range: {}..{}",
                map.min_marker_size,
                map.max_marker_size
            ));
        }
        if map.dpi == 0 {
            return Err(anyhow!("dpi must be positive"));
        }
        if !(map.width_in > 0.0 && map.height_in > 0.0) {
            return Err(anyhow!("Figure size must be positive, got {}x{} in", map.width_in, map.height_in));
        }
        if map.density_levels < 2 {
            return Err(anyhow!("density_levels must be at least 2"));
        }
        if !(0.0..1.0).contains(&map.density_thresh) {
            return Err(anyhow!("density_thresh must be in [0, 1), got {}", map.density_thresh));
        }
        if !(map.bw_adjust > 0.0) {
            return Err(anyhow!("bw_adjust must be positive"));
        }
        if map.density_gridsize < 2 {
            return Err(anyhow!("density_gridsize must be at least 2"));
        }
        if !(map.scale_bar_km > 0.0) {
            return Err(anyhow!("scale_bar_km must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [input]
            neighborhoods = "hoods.shp"
            streets = "streets.csv"

            [output]
            image = "map.png"
            "#,
        )
        .unwrap();

        assert_eq!(config.input.name_column, "PRI_NEIGH");
        assert_eq!(config.input.weight_column, "Weight");
        assert_eq!(config.input.source_crs, None);
        assert_eq!(config.map.dpi, 300);
        assert_eq!(config.map.min_marker_size, 20.0);
        assert_eq!(config.map.max_marker_size, 120.0);
        assert_eq!(config.map.planar_crs, 26971);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_map_section_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [input]
            neighborhoods = "hoods.geojson"
            streets = "streets.csv"

            [map]
            dpi = 72
            title = "Test"

            [output]
            image = "map.png"
            "#,
        )
        .unwrap();

        assert_eq!(config.map.dpi, 72);
        assert_eq!(config.map.title, "Test");
        assert_eq!(config.map.bw_adjust, 0.7);
    }

    #[test]
    fn rejects_inverted_marker_range() {
        let mut config = AppConfig::new("a.shp", "b.csv", "c.png");
        config.map.min_marker_size = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_dpi() {
        let mut config = AppConfig::new("a.shp", "b.csv", "c.png");
        config.map.dpi = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load_from_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
