use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WeightedKde {
    xs: Vec<f64>,
    ys: Vec<f64>,
    weights: Vec<f64>, // normalized to sum 1
    covariance: [f64; 3], // xx, xy, yy
    inverse: [f64; 3],
    norm: f64,
}

impl WeightedKde {
    /// `None` when the points cannot support a 2-D kernel: no positive
    /// weight mass, a single effective point, or collinear points.
    pub fn fit(xs: &[f64], ys: &[f64], weights: &[f64], bw_adjust: f64) -> Option<Self> {
        if xs.len() != ys.len() || xs.len() != weights.len() || xs.is_empty() {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) || weights.iter().any(|w| *w < 0.0) {
            return None;
        }
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
        let n_eff = 1.0 / sum_sq;

        let mean_x: f64 = xs.iter().zip(&weights).map(|(x, w)| x * w).sum();
        let mean_y: f64 = ys.iter().zip(&weights).map(|(y, w)| y * w).sum();

        let correction = 1.0 - sum_sq;
        if correction <= 0.0 {
            return None;
        }
        let mut cov = [0.0; 3];
        for ((x, y), w) in xs.iter().zip(ys).zip(&weights) {
            let dx = x - mean_x;
            let dy = y - mean_y;
            cov[0] += w * dx * dx;
            cov[1] += w * dx * dy;
            cov[2] += w * dy * dy;
        }

        let factor = n_eff.powf(-1.0 / 6.0) * bw_adjust;
        let scale = factor * factor / correction;
        let covariance = [cov[0] * scale, cov[1] * scale, cov[2] * scale];

        let det = covariance[0] * covariance[2] - covariance[1] * covariance[1];
        if !(det.is_finite() && det > 0.0) {
            return None;
        }
        let inverse = [covariance[2] / det, -covariance[1] / det, covariance[0] / det];

        Some(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            weights,
            covariance,
            inverse,
            norm: 1.0 / (2.0 * PI * det.sqrt()),
        })
    }

    pub fn bandwidth(&self) -> (f64, f64) {
        (self.covariance[0].sqrt(), self.covariance[2].sqrt())
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let [a, b, c] = self.inverse;
        self.xs
            .iter()
            .zip(&self.ys)
            .zip(&self.weights)
            .map(|((px, py), w)| {
                let dx = x - px;
                let dy = y - py;
                let q = a * dx * dx + 2.0 * b * dx * dy + c * dy * dy;
                w * (-0.5 * q).exp()
            })
            .sum::<f64>()
            * self.norm
    }

    pub fn grid(&self, gridsize: usize, cut: f64) -> DensityGrid {
        let (bw_x, bw_y) = self.bandwidth();
        let xs = support(&self.xs, bw_x, cut, gridsize);
        let ys = support(&self.ys, bw_y, cut, gridsize);

        let nx = xs.len();
        let values: Vec<f64> = (0..nx * ys.len())
            .into_par_iter()
            .map(|k| self.evaluate(xs[k % nx], ys[k / nx]))
            .collect();

        debug!(gridsize, "Evaluated density grid");
        DensityGrid { xs, ys, values }
    }
}

fn support(values: &[f64], bw: f64, cut: f64, gridsize: usize) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min) - cut * bw;
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max) + cut * bw;
    linspace(lo, hi, gridsize)
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DensityGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub values: Vec<f64>, // row-major, x varying fastest
}

impl DensityGrid {
    fn at(&self, i: usize, j: usize) -> f64 {
        self.values[j * self.xs.len() + i]
    }

    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let (nx, ny) = (self.xs.len(), self.ys.len());
        if nx < 2 || ny < 2 {
            return 0.0;
        }
        let (x0, x1) = (self.xs[0], self.xs[nx - 1]);
        let (y0, y1) = (self.ys[0], self.ys[ny - 1]);
        if !(x >= x0 && x <= x1 && y >= y0 && y <= y1) {
            return 0.0;
        }

        let fx = (x - x0) / (x1 - x0) * (nx - 1) as f64;
        let fy = (y - y0) / (y1 - y0) * (ny - 1) as f64;
        let i = (fx.floor() as usize).min(nx - 2);
        let j = (fy.floor() as usize).min(ny - 2);
        let tx = fx - i as f64;
        let ty = fy - j as f64;

        let bottom = self.at(i, j) * (1.0 - tx) + self.at(i + 1, j) * tx;
        let top = self.at(i, j + 1) * (1.0 - tx) + self.at(i + 1, j + 1) * tx;
        bottom * (1.0 - ty) + top * ty
    }

    /// Density values enclosing `1 - q` of the grid mass for `levels`
    /// proportions `q` spaced from `thresh` to 1. Ascending, deduplicated.
    pub fn iso_proportion_levels(&self, thresh: f64, levels: usize) -> Vec<f64> {
        let total: f64 = self.values.iter().sum();
        if !(total > 0.0) {
            return Vec::new();
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));

        let mut running = 0.0;
        let cumulative: Vec<f64> = sorted
            .iter()
            .map(|v| {
                running += v;
                running / total
            })
            .collect();

        let mut out: Vec<f64> = linspace(thresh, 1.0, levels)
            .into_iter()
            .map(|q| {
                let idx = cumulative.partition_point(|c| *c < 1.0 - q);
                sorted[idx.min(sorted.len() - 1)]
            })
            .collect();
        out.sort_by(|a, b| a.total_cmp(b));
        out.dedup();
        out
    }
}

#[derive(Debug, Clone)]
pub struct ContourBands {
    levels: Vec<f64>,
}

impl ContourBands {
    pub fn new(levels: Vec<f64>) -> Option<Self> {
        if levels.len() < 2 {
            warn!(levels = levels.len(), "Too few distinct density levels for a heatmap");
            return None;
        }
        Some(Self { levels })
    }

    pub fn count(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn band(&self, value: f64) -> Option<usize> {
        if !(value >= self.levels[0]) {
            return None;
        }
        let above = self.levels.partition_point(|l| *l <= value);
        Some((above - 1).min(self.count() - 1))
    }

    pub fn color_position(&self, band: usize) -> f64 {
        let mid = |k: usize| (self.levels[k] + self.levels[k + 1]) / 2.0;
        let (lo, hi) = (mid(0), mid(self.count() - 1));
        if hi > lo {
            ((mid(band) - lo) / (hi - lo)).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
