use crate::annotate::{compass_rose, nice_ticks, scale_bar, Extent, Fill};
use crate::canvas::{
    load_font, oranges, with_alpha, Figure, HAlign, PixelRect, VAlign, BLACK, BLUE, GRAY, LIGHT_GRAY, RED, WHITE,
};
use crate::config::MapConfig;
use crate::density::{ContourBands, DensityGrid, WeightedKde};
use crate::processing::{legend_entries, neighborhood_labels, scale_marker_sizes, split_columns, WeightRange};
use crate::types::{Neighborhood, StreetLocation, StreetTable};
use anyhow::Result;
use geo::{Coord, LineString};
use image::Rgba;
use rayon::prelude::*;
use std::path::Path;
use tracing::{info, warn};

// axes region, figure fractions
const AXES_LEFT: f64 = 0.06;
const AXES_RIGHT: f64 = 0.97;
const AXES_BOTTOM: f64 = 0.05;
const AXES_TOP: f64 = 0.93;

const COMPASS_ANCHOR: (f64, f64) = (0.92, 0.92);
const COMPASS_SIZE: f64 = 0.02;
const SCALE_BAR_LOCATION: (f64, f64) = (0.034, 0.09);

const LABEL_COLUMNS: usize = 2;
const LABEL_COLUMN_X: [f64; LABEL_COLUMNS] = [0.85, 0.99];

// #b0b0b0 at 0.7 alpha over white
const GRID_COLOR: Rgba<u8> = Rgba([200, 200, 200, 255]);
const LEGEND_EDGE: Rgba<u8> = Rgba([204, 204, 204, 255]);

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub extent: Extent,
    pub width: u32,
    pub height: u32,
    pub markers: usize,
    pub heatmap: bool,
}

#[derive(Debug, Clone, Copy)]
struct Axes {
    extent: Extent,
    rect: PixelRect,
}

impl Axes {
    /// Largest box inside the available figure region that keeps the
    /// geographic aspect `1 / cos(mid latitude)`, centred.
    fn fit(figure: &Figure, extent: Extent) -> Self {
        let (ax0, ay0) = figure.fig_to_px(AXES_LEFT, AXES_TOP);
        let (ax1, ay1) = figure.fig_to_px(AXES_RIGHT, AXES_BOTTOM);
        let (avail_w, avail_h) = ((ax1 - ax0) as f64, (ay1 - ay0) as f64);

        let aspect = 1.0 / extent.mid_y().to_radians().cos();
        let ratio = extent.height() * aspect / extent.width();
        let (w, h) = if ratio > avail_h / avail_w {
            (avail_h / ratio, avail_h)
        } else {
            (avail_w, avail_w * ratio)
        };

        let x0 = ax0 as f64 + (avail_w - w) / 2.0;
        let y0 = ay0 as f64 + (avail_h - h) / 2.0;
        Self {
            extent,
            rect: PixelRect {
                x0: x0 as f32,
                y0: y0 as f32,
                x1: (x0 + w) as f32,
                y1: (y0 + h) as f32,
            },
        }
    }

    fn to_px(&self, c: Coord<f64>) -> (f32, f32) {
        let e = &self.extent;
        let r = &self.rect;
        (
            r.x0 + ((c.x - e.min_x) / e.width()) as f32 * r.width(),
            r.y0 + ((e.max_y - c.y) / e.height()) as f32 * r.height(),
        )
    }

    fn to_data(&self, px: f32, py: f32) -> Coord<f64> {
        let e = &self.extent;
        let r = &self.rect;
        Coord {
            x: e.min_x + ((px - r.x0) / r.width()) as f64 * e.width(),
            y: e.max_y - ((py - r.y0) / r.height()) as f64 * e.height(),
        }
    }

    fn ring_px(&self, ring: &LineString<f64>) -> Vec<(f32, f32)> {
        ring.coords().map(|c| self.to_px(*c)).collect()
    }
}

pub struct MapPlotter<'a> {
    config: &'a MapConfig,
    neighborhoods: &'a [Neighborhood],
    streets: &'a [StreetLocation],
    table: &'a StreetTable,
}

impl<'a> MapPlotter<'a> {
    pub fn new(
        config: &'a MapConfig,
        neighborhoods: &'a [Neighborhood],
        streets: &'a [StreetLocation],
        table: &'a StreetTable,
    ) -> Self {
        Self {
            config,
            neighborhoods,
            streets,
            table,
        }
    }

    pub fn plot(&self, output: &Path) -> Result<RenderSummary> {
        let weights: Vec<f64> = self.streets.iter().map(|s| s.weight).collect();
        let range = WeightRange::from_weights(&weights)?;
        let extent = Extent::of_polygons(self.neighborhoods.iter().map(|n| &n.geometry))?;

        let font = load_font(self.config.font.as_deref())?;
        let mut figure = Figure::new(self.config.width_in, self.config.height_in, self.config.dpi, font)?;
        let axes = Axes::fit(&figure, extent);

        let heatmap = self.draw_density(&mut figure, &axes);
        self.draw_markers(&mut figure, &axes, &weights, range);
        self.draw_grid(&mut figure, &axes);
        self.draw_ids(&mut figure, &axes);
        self.draw_north_arrow(&mut figure, &axes)?;
        self.draw_scale_bar(&mut figure, &axes)?;
        self.draw_boundaries(&mut figure, &axes);
        self.draw_frame(&mut figure, &axes);

        self.draw_title(&mut figure);
        self.draw_labels(&mut figure);
        self.draw_legend(&mut figure, range);
        self.draw_datasource(&mut figure);

        let (width, height) = figure.save(output)?;
        info!(?output, width, height, "Wrote map image");

        Ok(RenderSummary {
            extent,
            width,
            height,
            markers: self.streets.len(),
            heatmap,
        })
    }

    fn density_grid(&self) -> Option<DensityGrid> {
        let kde = WeightedKde::fit(
            &self.table.longitude,
            &self.table.latitude,
            &self.table.weight,
            self.config.bw_adjust,
        );
        match kde {
            Some(kde) => Some(kde.grid(self.config.density_gridsize, self.config.density_cut)),
            None => {
                warn!(points = self.table.len(), "Points cannot support a density estimate; skipping heatmap");
                None
            }
        }
    }

    fn draw_density(&self, figure: &mut Figure, axes: &Axes) -> bool {
        let Some(grid) = self.density_grid() else {
            return false;
        };
        let levels = grid.iso_proportion_levels(self.config.density_thresh, self.config.density_levels);
        let Some(bands) = ContourBands::new(levels) else {
            return false;
        };

        let alpha = self.config.heatmap_alpha;
        let rect = axes.rect;
        let (x0, x1) = (rect.x0.max(0.0) as u32, rect.x1.ceil().max(0.0) as u32);
        let (y0, y1) = (rect.y0.max(0.0) as u32, rect.y1.ceil().max(0.0) as u32);

        let rows: Vec<(u32, Vec<Option<Rgba<u8>>>)> = (y0..y1)
            .into_par_iter()
            .map(|py| {
                let row = (x0..x1)
                    .map(|px| {
                        let c = axes.to_data(px as f32 + 0.5, py as f32 + 0.5);
                        bands
                            .band(grid.sample(c.x, c.y))
                            .map(|band| with_alpha(oranges(bands.color_position(band)), alpha))
                    })
                    .collect();
                (py, row)
            })
            .collect();

        for (py, row) in rows {
            for (px, color) in (x0..).zip(row) {
                if let Some(color) = color {
                    figure.blend_pixel(px, py, color);
                }
            }
        }
        figure.mark(rect);
        true
    }

    fn draw_markers(&self, figure: &mut Figure, axes: &Axes, weights: &[f64], range: WeightRange) {
        let sizes = scale_marker_sizes(weights, range, self.config.min_marker_size, self.config.max_marker_size);
        let color = with_alpha(RED, self.config.marker_alpha);
        for (street, size) in self.streets.iter().zip(sizes) {
            // marker size is an area in pt^2
            let radius = figure.pt(size.sqrt() / 2.0);
            figure.fill_circle(axes.to_px(street.point.0), radius, color);
        }
    }

    fn draw_grid(&self, figure: &mut Figure, axes: &Axes) {
        let e = axes.extent;
        let r = axes.rect;
        let width = figure.pt(0.5);
        let tick_len = figure.pt(3.5);
        let tick_width = figure.pt(0.8);
        let (xticks, x_decimals) = nice_ticks(e.min_x, e.max_x, 8);
        let (yticks, y_decimals) = nice_ticks(e.min_y, e.max_y, 8);

        for x in xticks {
            let (px, _) = axes.to_px(Coord { x, y: e.min_y });
            figure.dashed_line((px, r.y0), (px, r.y1), GRID_COLOR, width);
            figure.stroke_path(&[(px, r.y1), (px, r.y1 + tick_len)], false, BLACK, tick_width);
            figure.text(
                &format!("{:.*}", x_decimals, x),
                (px, r.y1 + tick_len * 1.5),
                10.0,
                BLACK,
                HAlign::Center,
                VAlign::Top,
            );
        }
        for y in yticks {
            let (_, py) = axes.to_px(Coord { x: e.min_x, y });
            figure.dashed_line((r.x0, py), (r.x1, py), GRID_COLOR, width);
            figure.stroke_path(&[(r.x0 - tick_len, py), (r.x0, py)], false, BLACK, tick_width);
            figure.text(
                &format!("{:.*}", y_decimals, y),
                (r.x0 - tick_len * 1.5, py),
                10.0,
                BLACK,
                HAlign::Right,
                VAlign::Center,
            );
        }
    }

    fn draw_ids(&self, figure: &mut Figure, axes: &Axes) {
        for hood in self.neighborhoods {
            let at = axes.to_px(hood.centroid.0);
            figure.text(&hood.id.to_string(), at, 9.0, BLUE, HAlign::Center, VAlign::Center);
        }
    }

    fn draw_north_arrow(&self, figure: &mut Figure, axes: &Axes) -> Result<()> {
        let rose = compass_rose(&axes.extent, COMPASS_ANCHOR, COMPASS_SIZE)?;
        let edge = figure.pt(1.0);
        for wedge in &rose.wedges {
            let points: Vec<(f32, f32)> = wedge.triangle.iter().map(|c| axes.to_px(*c)).collect();
            let fill = match wedge.fill {
                Fill::Black => BLACK,
                Fill::White => WHITE,
            };
            figure.fill_polygon(&points, fill);
            figure.stroke_path(&points, true, BLACK, edge);
        }
        for (letter, at) in &rose.letters {
            figure.text(&letter.to_string(), axes.to_px(*at), 10.0, BLACK, HAlign::Center, VAlign::Center);
        }
        Ok(())
    }

    fn draw_scale_bar(&self, figure: &mut Figure, axes: &Axes) -> Result<()> {
        let bar = scale_bar(
            &axes.extent,
            self.config.scale_bar_km,
            SCALE_BAR_LOCATION,
            self.config.scale_bar_latitude,
        )?;
        let edge = figure.pt(1.0);
        for (segment, fill) in bar.segments.iter().zip([BLACK, LIGHT_GRAY]) {
            let (x0, y1) = axes.to_px(Coord { x: segment.x, y: segment.y });
            let (x1, y0) = axes.to_px(Coord {
                x: segment.x + segment.width,
                y: segment.y + segment.height,
            });
            let rect = PixelRect { x0, y0, x1, y1 };
            figure.fill_rect(rect, fill);
            figure.stroke_rect(rect, BLACK, edge);
        }
        figure.text(&bar.label, axes.to_px(bar.label_at), 10.0, BLACK, HAlign::Center, VAlign::Bottom);
        Ok(())
    }

    fn draw_boundaries(&self, figure: &mut Figure, axes: &Axes) {
        let width = figure.pt(1.0);
        for hood in self.neighborhoods {
            for polygon in &hood.geometry {
                let exterior = axes.ring_px(polygon.exterior());
                figure.stroke_path(&exterior, true, BLACK, width);
                for interior in polygon.interiors() {
                    let ring = axes.ring_px(interior);
                    figure.stroke_path(&ring, true, BLACK, width);
                }
            }
        }
    }

    fn draw_frame(&self, figure: &mut Figure, axes: &Axes) {
        let width = figure.pt(0.8);
        figure.stroke_rect(axes.rect, BLACK, width);
    }

    fn draw_title(&self, figure: &mut Figure) {
        let at = figure.fig_to_px(0.5, 0.98);
        figure.text(&self.config.title, at, 16.0, BLACK, HAlign::Center, VAlign::Top);
    }

    fn draw_labels(&self, figure: &mut Figure) {
        let labels = neighborhood_labels(self.neighborhoods);
        let header_at = figure.fig_to_px(0.965, 0.86);
        figure.text("Chicago Neighborhoods", header_at, 12.0, BLACK, HAlign::Center, VAlign::Bottom);

        for (column, x) in split_columns(&labels, LABEL_COLUMNS).into_iter().zip(LABEL_COLUMN_X) {
            if column.is_empty() {
                continue;
            }
            let at = figure.fig_to_px(x, 0.5);
            figure.text(&column.join("\n"), at, 10.0, BLACK, HAlign::Left, VAlign::Center);
        }
    }

    // centred on (0.24, 0.19)
    fn draw_legend(&self, figure: &mut Figure, range: WeightRange) {
        let entries = legend_entries(range, self.config.min_marker_size, self.config.max_marker_size);
        let (title_pt, label_pt) = (9.0, 8.0);
        let Some(title_size) = figure.measure_text("Locations", title_pt) else {
            return;
        };

        let pad = figure.pt(0.4 * label_pt);
        let handle_w = figure.pt(2.0 * label_pt);
        let handle_gap = figure.pt(0.8 * label_pt);
        let row_gap = figure.pt(0.5 * label_pt);
        let edge = figure.pt(0.8);

        let rows: Vec<(f32, f32, f32)> = entries
            .iter()
            .map(|entry| {
                let (w, h) = figure.measure_text(&entry.label, label_pt).unwrap_or((0.0, 0.0));
                let marker = figure.pt(entry.diameter);
                (w, h.max(marker), marker)
            })
            .collect();

        let body_w = rows.iter().map(|r| handle_w + handle_gap + r.0).fold(0.0, f32::max);
        let body_h: f32 = rows.iter().map(|r| r.1).sum::<f32>() + row_gap * rows.len() as f32;
        let box_w = body_w.max(title_size.0) + 2.0 * pad;
        let box_h = title_size.1 + body_h + 2.0 * pad;

        let (cx, cy) = figure.fig_to_px(0.24, 0.19);
        let frame = PixelRect {
            x0: cx - box_w / 2.0,
            y0: cy - box_h / 2.0,
            x1: cx + box_w / 2.0,
            y1: cy + box_h / 2.0,
        };
        figure.fill_rect(frame, with_alpha(WHITE, 0.5));
        figure.stroke_rect(frame, LEGEND_EDGE, edge);

        figure.text("Locations", (cx, frame.y0 + pad), title_pt, BLACK, HAlign::Center, VAlign::Top);

        let marker_color = with_alpha(RED, self.config.marker_alpha);
        let mut y = frame.y0 + pad + title_size.1 + row_gap;
        for (entry, (_, row_h, marker)) in entries.iter().zip(rows) {
            let mid = y + row_h / 2.0;
            let left = frame.x0 + pad;
            figure.fill_circle((left + handle_w / 2.0, mid), marker / 2.0, marker_color);
            figure.text(&entry.label, (left + handle_w + handle_gap, mid), label_pt, BLACK, HAlign::Left, VAlign::Center);
            y += row_h + row_gap;
        }
    }

    fn draw_datasource(&self, figure: &mut Figure) {
        let text = self.config.attribution.join("\n");
        let size_pt = 6.0;
        let Some((w, h)) = figure.measure_text(&text, size_pt) else {
            return;
        };
        let pad = figure.pt(0.3 * size_pt);
        let (x, y) = figure.fig_to_px(0.20, 0.08);
        let backdrop = PixelRect {
            x0: x - pad,
            y0: y - h - pad,
            x1: x + w + pad,
            y1: y + pad,
        };
        figure.fill_rect(backdrop, with_alpha(WHITE, 0.5));
        figure.text(&text, (x, y), size_pt, GRAY, HAlign::Left, VAlign::Bottom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn axes_keep_geographic_aspect() {
        let figure = Figure::new(14.0, 12.0, 20, None).unwrap();
        let extent = Extent::new(-87.94, -87.52, 41.64, 42.02).unwrap();
        let axes = Axes::fit(&figure, extent);

        let px_ratio = axes.rect.height() / axes.rect.width();
        let expected = extent.height() / extent.mid_y().to_radians().cos() / extent.width();
        assert_abs_diff_eq!(px_ratio as f64, expected, epsilon = 1e-3);
    }

    #[test]
    fn pixel_mapping_round_trips() {
        let figure = Figure::new(4.0, 3.0, 50, None).unwrap();
        let extent = Extent::new(-88.0, -87.0, 41.0, 42.0).unwrap();
        let axes = Axes::fit(&figure, extent);

        let (px, py) = axes.to_px(Coord { x: -88.0, y: 42.0 });
        assert_abs_diff_eq!(px, axes.rect.x0, epsilon = 1e-3);
        assert_abs_diff_eq!(py, axes.rect.y0, epsilon = 1e-3);

        let back = axes.to_data(px, py);
        assert_abs_diff_eq!(back.x, -88.0, epsilon = 1e-4);
        assert_abs_diff_eq!(back.y, 42.0, epsilon = 1e-4);
    }
}
