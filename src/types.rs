use geo::{MultiPolygon, Point};

#[derive(Debug, Clone)]
pub struct Neighborhood {
    /// 1-based position in the source file.
    pub id: u32,
    pub name: String,
    pub geometry: MultiPolygon<f64>, // EPSG:4326
    pub centroid: Point<f64>,
}

#[derive(Debug, Clone)]
pub struct StreetLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub weight: f64, // mention count
    pub point: Point<f64>,
}

/// Column form of the street data, as consumed by the density estimator.
#[derive(Debug, Clone, Default)]
pub struct StreetTable {
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub weight: Vec<f64>,
}

impl StreetTable {
    pub fn len(&self) -> usize {
        self.weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }
}
