use anyhow::{anyhow, Result};
use geo::{BoundingRect, Coord, MultiPolygon};

const KM_PER_DEGREE: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Result<Self> {
        let extent = Self { min_x, max_x, min_y, max_y };
        extent.validate()?;
        Ok(extent)
    }

    pub fn of_polygons<'a>(polygons: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Result<Self> {
        let mut bounds: Option<(Coord<f64>, Coord<f64>)> = None;
        for rect in polygons.into_iter().filter_map(|p| p.bounding_rect()) {
            bounds = Some(match bounds {
                None => (rect.min(), rect.max()),
                Some((lo, hi)) => (
                    Coord { x: lo.x.min(rect.min().x), y: lo.y.min(rect.min().y) },
                    Coord { x: hi.x.max(rect.max().x), y: hi.y.max(rect.max().y) },
                ),
            });
        }
        let (lo, hi) = bounds.ok_or_else(|| anyhow!("Cannot frame an empty polygon layer"))?;
        Self::new(lo.x, hi.x, lo.y, hi.y)
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.min_x, self.max_x, self.min_y, self.max_y];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Non-finite axis limits: {:?}", self));
        }
        if !(self.max_x > self.min_x && self.max_y > self.min_y) {
            return Err(anyhow!("Empty axis limits: {:?}", self));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn mid_y(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    // axis fraction (0..1) to data coordinates
    pub fn from_fraction(&self, fx: f64, fy: f64) -> Coord<f64> {
        Coord {
            x: self.min_x + self.width() * fx,
            y: self.min_y + self.height() * fy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    Black,
    White,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wedge {
    pub bearing: f64,
    pub triangle: [Coord<f64>; 3],
    pub fill: Fill,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompassRose {
    pub center: Coord<f64>,
    pub wedges: Vec<Wedge>,
    pub letters: Vec<(char, Coord<f64>)>,
}

const WEDGE_BASE: f64 = 0.3;
const LETTER_OFFSET: f64 = 1.2;

// N/S wedges black, E/W white
pub fn compass_rose(extent: &Extent, anchor: (f64, f64), size: f64) -> Result<CompassRose> {
    extent.validate()?;
    let center = extent.from_fraction(anchor.0, anchor.1);

    let wedges = [0.0_f64, 90.0, 180.0, 270.0]
        .into_iter()
        .map(|bearing| {
            let theta = bearing.to_radians();
            let (dx, dy) = (theta.sin() * size, theta.cos() * size);
            let (px, py) = (-dy * WEDGE_BASE, dx * WEDGE_BASE);
            Wedge {
                bearing,
                triangle: [
                    Coord { x: center.x + px, y: center.y + py },
                    Coord { x: center.x + dx, y: center.y + dy },
                    Coord { x: center.x - px, y: center.y - py },
                ],
                fill: if bearing % 180.0 == 0.0 { Fill::Black } else { Fill::White },
            }
        })
        .collect();

    let letters = [('N', (0.0, 1.0)), ('E', (1.0, 0.0)), ('S', (0.0, -1.0)), ('W', (-1.0, 0.0))]
        .into_iter()
        .map(|(letter, (ux, uy))| {
            (
                letter,
                Coord {
                    x: center.x + ux * LETTER_OFFSET * size,
                    y: center.y + uy * LETTER_OFFSET * size,
                },
            )
        })
        .collect();

    Ok(CompassRose { center, wedges, letters })
}

pub fn lon_degrees_per_km(latitude: f64) -> f64 {
    1.0 / (KM_PER_DEGREE * latitude.to_radians().cos())
}

pub fn lat_degrees_per_km() -> f64 {
    1.0 / KM_PER_DEGREE
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBar {
    pub length_deg: f64,
    pub segments: [Rect; 2],
    pub label: String,
    pub label_at: Coord<f64>,
}

const BAR_HEIGHT_KM: f64 = 0.3;

pub fn scale_bar(extent: &Extent, length_km: f64, location: (f64, f64), latitude: f64) -> Result<ScaleBar> {
    extent.validate()?;
    if !(length_km.is_finite() && length_km > 0.0) {
        return Err(anyhow!("Scale bar length must be positive, got {}", length_km));
    }
    let length_deg = length_km * lon_degrees_per_km(latitude);
    let height = BAR_HEIGHT_KM * lat_degrees_per_km();
    let start = extent.from_fraction(location.0, location.1);
    let half = length_deg / 2.0;

    Ok(ScaleBar {
        length_deg,
        segments: [
            Rect { x: start.x, y: start.y, width: half, height },
            Rect { x: start.x + half, y: start.y, width: half, height },
        ],
        label: format!("{} km", length_km),
        label_at: Coord { x: start.x + half, y: start.y + height * 1.5 },
    })
}

/// Tick positions at a 1, 2, 2.5 or 5 × 10^k step giving at most
/// `max_ticks` ticks inside `[min, max]`, and the decimals needed to
/// print them.
pub fn nice_ticks(min: f64, max: f64, max_ticks: usize) -> (Vec<f64>, usize) {
    if !(min.is_finite() && max.is_finite() && max > min) || max_ticks < 2 {
        return (Vec::new(), 0);
    }
    let raw = (max - min) / (max_ticks - 1) as f64;
    let exponent = raw.log10().floor() as i32;
    let magnitude = 10f64.powi(exponent);
    // (multiplier, extra decimals, exponent shift)
    let (step, extra, shift) = [(1.0, 0, 0), (2.0, 0, 0), (2.5, 1, 0), (5.0, 0, 0), (10.0, 0, 1)]
        .into_iter()
        .map(|(m, extra, shift)| (m * magnitude, extra, shift))
        .find(|(step, _, _)| *step >= raw)
        .unwrap_or((10.0 * magnitude, 0, 1));

    let decimals = (-(exponent + shift)).max(0) as usize + extra;
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    let ticks = (first..=last).map(|k| k as f64 * step).collect();
    (ticks, decimals)
}
