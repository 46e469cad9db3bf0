use anyhow::{anyhow, Result};
use geo::{Centroid, Coord, MapCoords, MultiPolygon, Point};

// GRS80
const SEMI_MAJOR: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_222_101;

// metres per US survey foot
const US_FOOT: f64 = 1200.0 / 3937.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    Geographic,       // EPSG:4326, x = lon, y = lat
    IllinoisEast,     // EPSG:26971, metres
    IllinoisEastFeet, // EPSG:3435, US survey feet
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 | 4269 => Ok(Crs::Geographic),
            26971 => Ok(Crs::IllinoisEast),
            3435 => Ok(Crs::IllinoisEastFeet),
            _ => Err(anyhow!("Unsupported CRS: EPSG:{}", code)),
        }
    }

    // ESRI or OGC WKT from a shapefile's .prj
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let flat: String = wkt
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect();

        if flat.starts_with("geogcs") || flat.starts_with("geogcrs") {
            return Ok(Crs::Geographic);
        }
        if flat.starts_with("projcs") || flat.starts_with("projcrs") {
            if flat.contains("illinoiseast") || flat.contains("\"epsg\",\"3435\"") {
                let feet = flat.contains("foot") || flat.contains("feet") || flat.contains("ftus");
                return Ok(if feet { Crs::IllinoisEastFeet } else { Crs::IllinoisEast });
            }
            if flat.contains("\"epsg\",\"26971\"") {
                return Ok(Crs::IllinoisEast);
            }
        }

        let name = wkt.split('"').nth(1).unwrap_or(wkt.trim());
        Err(anyhow!("Unsupported CRS in projection file: {}", name))
    }

    pub fn epsg(self) -> u32 {
        match self {
            Crs::Geographic => 4326,
            Crs::IllinoisEast => 26971,
            Crs::IllinoisEastFeet => 3435,
        }
    }

    fn to_geographic(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Geographic => c,
            Crs::IllinoisEast => ILLINOIS_EAST.inverse(c),
            Crs::IllinoisEastFeet => ILLINOIS_EAST.inverse(Coord { x: c.x * US_FOOT, y: c.y * US_FOOT }),
        }
    }

    fn from_geographic(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Geographic => c,
            Crs::IllinoisEast => ILLINOIS_EAST.forward(c),
            Crs::IllinoisEastFeet => {
                let m = ILLINOIS_EAST.forward(c);
                Coord { x: m.x / US_FOOT, y: m.y / US_FOOT }
            }
        }
    }

    pub fn transform(self, to: Crs, c: Coord<f64>) -> Coord<f64> {
        if self == to {
            return c;
        }
        to.from_geographic(self.to_geographic(c))
    }
}

struct TransverseMercator {
    lat0: f64, // degrees
    lon0: f64, // degrees
    k0: f64,
    false_easting: f64,
    false_northing: f64,
}

const ILLINOIS_EAST: TransverseMercator = TransverseMercator {
    lat0: 36.0 + 40.0 / 60.0,
    lon0: -(88.0 + 20.0 / 60.0),
    k0: 0.999_975,
    false_easting: 300_000.0,
    false_northing: 0.0,
};

fn e2() -> f64 {
    FLATTENING * (2.0 - FLATTENING)
}

// meridian arc from the equator, phi in radians
fn meridian_arc(phi: f64) -> f64 {
    let e2 = e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    SEMI_MAJOR
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

impl TransverseMercator {
    fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        let e2 = e2();
        let ep2 = e2 / (1.0 - e2);
        let phi = c.y.to_radians();
        let dlam = (c.x - self.lon0).to_radians();

        let (sin_phi, cos_phi) = phi.sin_cos();
        let n = SEMI_MAJOR / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = phi.tan().powi(2);
        let cc = ep2 * cos_phi * cos_phi;
        let a = dlam * cos_phi;

        let m = meridian_arc(phi);
        let m0 = meridian_arc(self.lat0.to_radians());

        let x = self.k0
            * n
            * (a + (1.0 - t + cc) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * cc - 58.0 * ep2) * a.powi(5) / 120.0);
        let y = self.k0
            * (m - m0
                + n * phi.tan()
                    * (a * a / 2.0
                        + (5.0 - t + 9.0 * cc + 4.0 * cc * cc) * a.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * cc - 330.0 * ep2) * a.powi(6) / 720.0));

        Coord {
            x: x + self.false_easting,
            y: y + self.false_northing,
        }
    }

    fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        let e2 = e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let m = meridian_arc(self.lat0.to_radians()) + (c.y - self.false_northing) / self.k0;
        let mu = m / (SEMI_MAJOR * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

        // footpoint latitude
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let c1 = ep2 * cos1 * cos1;
        let t1 = phi1.tan().powi(2);
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = SEMI_MAJOR / w.sqrt();
        let r1 = SEMI_MAJOR * (1.0 - e2) / w.powf(1.5);
        let d = (c.x - self.false_easting) / (n1 * self.k0);

        let phi = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lam = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;

        Coord {
            x: self.lon0 + lam.to_degrees(),
            y: phi.to_degrees(),
        }
    }
}

pub fn reproject(geometry: &MultiPolygon<f64>, from: Crs, to: Crs) -> MultiPolygon<f64> {
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(|c| from.transform(to, c))
}

// Area-weighted centroid in `planar`, returned as lon/lat
pub fn planar_centroid(polygon: &MultiPolygon<f64>, source: Crs, planar: Crs) -> Option<Point<f64>> {
    let projected = reproject(polygon, source, planar);
    let centroid = projected.centroid()?;
    let geographic = planar.transform(Crs::Geographic, centroid.0);
    if geographic.x.is_finite() && geographic.y.is_finite() {
        Some(Point(geographic))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{polygon, Contains, Intersects};

    #[test]
    fn origin_maps_to_false_easting() {
        let origin = Coord { x: ILLINOIS_EAST.lon0, y: ILLINOIS_EAST.lat0 };
        let projected = Crs::Geographic.transform(Crs::IllinoisEast, origin);
        assert_abs_diff_eq!(projected.x, 300_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(projected.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn round_trip_downtown_chicago() {
        let loop_ = Coord { x: -87.6298, y: 41.8781 };
        let there = Crs::Geographic.transform(Crs::IllinoisEast, loop_);
        let back = Crs::IllinoisEast.transform(Crs::Geographic, there);
        assert_abs_diff_eq!(back.x, loop_.x, epsilon = 1e-8);
        assert_abs_diff_eq!(back.y, loop_.y, epsilon = 1e-8);
    }

    #[test]
    fn northing_grows_with_latitude() {
        let south = Crs::Geographic.transform(Crs::IllinoisEast, Coord { x: -87.7, y: 41.7 });
        let north = Crs::Geographic.transform(Crs::IllinoisEast, Coord { x: -87.7, y: 41.9 });
        // 0.2 degrees of latitude is about 22.2 km
        assert_abs_diff_eq!(north.y - south.y, 22_210.0, epsilon = 50.0);
    }

    #[test]
    fn rejects_unknown_epsg() {
        assert!(Crs::from_epsg(3857).is_err());
        assert_eq!(Crs::from_epsg(26971).unwrap(), Crs::IllinoisEast);
        assert_eq!(Crs::from_epsg(3435).unwrap(), Crs::IllinoisEastFeet);
    }

    #[test]
    fn feet_grid_is_metre_grid_rescaled() {
        let loop_ = Coord { x: -87.6298, y: 41.8781 };
        let metres = Crs::Geographic.transform(Crs::IllinoisEast, loop_);
        let feet = Crs::Geographic.transform(Crs::IllinoisEastFeet, loop_);
        assert_abs_diff_eq!(feet.x * US_FOOT, metres.x, epsilon = 1e-6);
        assert_abs_diff_eq!(feet.y * US_FOOT, metres.y, epsilon = 1e-6);
        // City Hall sits near (1.176e6, 1.899e6) ftUS
        assert_abs_diff_eq!(feet.x, 1_176_000.0, epsilon = 2_000.0);
        assert_abs_diff_eq!(feet.y, 1_899_000.0, epsilon = 2_000.0);

        let back = Crs::IllinoisEastFeet.transform(Crs::Geographic, feet);
        assert_abs_diff_eq!(back.x, loop_.x, epsilon = 1e-8);
        assert_abs_diff_eq!(back.y, loop_.y, epsilon = 1e-8);
    }

    #[test]
    fn recognises_chicago_portal_prj() {
        let esri = r#"PROJCS["NAD_1983_StatePlane_Illinois_East_FIPS_1201_Feet",GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",984250.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",-88.33333333333333],PARAMETER["Scale_Factor",0.999975],PARAMETER["Latitude_Of_Origin",36.66666666666666],UNIT["Foot_US",0.3048006096012192]]"#;
        assert_eq!(Crs::from_wkt(esri).unwrap(), Crs::IllinoisEastFeet);

        let metres = r#"PROJCS["NAD83 / Illinois East",GEOGCS["NAD83",DATUM["North_American_Datum_1983",SPHEROID["GRS 1980",6378137,298.257222101]]],UNIT["metre",1],AUTHORITY["EPSG","26971"]]"#;
        assert_eq!(Crs::from_wkt(metres).unwrap(), Crs::IllinoisEast);

        let wgs84 = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(Crs::from_wkt(wgs84).unwrap(), Crs::Geographic);
    }

    #[test]
    fn unknown_prj_names_the_projection() {
        let mercator = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"]]"#;
        let err = Crs::from_wkt(mercator).unwrap_err();
        assert!(err.to_string().contains("WGS_1984_Web_Mercator_Auxiliary_Sphere"));
    }

    #[test]
    fn centroid_of_convex_polygon_lies_inside() {
        let square = MultiPolygon::new(vec![polygon![
            (x: -87.70, y: 41.85),
            (x: -87.60, y: 41.85),
            (x: -87.60, y: 41.95),
            (x: -87.70, y: 41.95),
        ]]);
        let c = planar_centroid(&square, Crs::Geographic, Crs::IllinoisEast).unwrap();
        assert!(square.contains(&c) || square.intersects(&c));
        assert_abs_diff_eq!(c.x(), -87.65, epsilon = 1e-3);
        assert_abs_diff_eq!(c.y(), 41.90, epsilon = 1e-3);
    }

    #[test]
    fn centroid_of_triangle_lies_inside() {
        let triangle = MultiPolygon::new(vec![polygon![
            (x: -87.80, y: 41.70),
            (x: -87.55, y: 41.72),
            (x: -87.62, y: 41.98),
        ]]);
        let c = planar_centroid(&triangle, Crs::Geographic, Crs::IllinoisEast).unwrap();
        assert!(triangle.contains(&c));
    }

    #[test]
    fn empty_geometry_has_no_centroid() {
        let empty = MultiPolygon::<f64>::new(vec![]);
        assert!(planar_centroid(&empty, Crs::Geographic, Crs::IllinoisEast).is_none());
    }
}
