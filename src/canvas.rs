use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut, draw_text_mut, text_size};
use imageproc::point::Point;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);
pub const LIGHT_GRAY: Rgba<u8> = Rgba([211, 211, 211, 255]);

// room for text placed past the figure edge; cropped on save
const MARGIN_X: f64 = 0.25;
const MARGIN_Y: f64 = 0.1;
const PAD_INCHES: f64 = 0.1;
const LINE_SPACING: f32 = 1.2;

const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn with_alpha(color: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let Rgba([r, g, b, _]) = color;
    Rgba([r, g, b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8])
}

// matplotlib "Oranges"
pub fn oranges(t: f64) -> Rgba<u8> {
    const STOPS: [[u8; 3]; 9] = [
        [0xff, 0xf5, 0xeb],
        [0xfe, 0xe6, 0xce],
        [0xfd, 0xd0, 0xa2],
        [0xfd, 0xae, 0x6b],
        [0xfd, 0x8d, 0x3c],
        [0xf1, 0x69, 0x13],
        [0xd9, 0x48, 0x01],
        [0xa6, 0x36, 0x03],
        [0x7f, 0x27, 0x04],
    ];
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (STOPS.len() - 1) as f64;
    let i = (pos.floor() as usize).min(STOPS.len() - 2);
    let f = pos - i as f64;
    let channel = |c: usize| (STOPS[i][c] as f64 * (1.0 - f) + STOPS[i + 1][c] as f64 * f).round() as u8;
    Rgba([channel(0), channel(1), channel(2), 255])
}

pub fn load_font(configured: Option<&Path>) -> Result<Option<FontArc>> {
    if let Some(path) = configured {
        let bytes = fs::read(path).with_context(|| format!("Failed to read font: {:?}", path))?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| anyhow!("Invalid font {:?}: {}", path, e))?;
        return Ok(Some(font));
    }
    for candidate in FALLBACK_FONTS.iter().map(PathBuf::from) {
        if let Ok(bytes) = fs::read(&candidate) {
            if let Ok(font) = FontArc::try_from_vec(bytes) {
                debug!(font = ?candidate, "Using system font");
                return Ok(Some(font));
            }
        }
    }
    warn!("No font found; text layers will be skipped. Set map.font to a TTF file.");
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VAlign {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PixelRect {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    fn union(self, other: PixelRect) -> PixelRect {
        PixelRect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

pub struct Figure {
    image: RgbaImage,
    dpi: f64,
    origin: (f64, f64),
    size: (f64, f64),
    font: Option<FontArc>,
    content: Option<PixelRect>,
}

impl Figure {
    pub fn new(width_in: f64, height_in: f64, dpi: u32, font: Option<FontArc>) -> Result<Self> {
        let dpi = dpi as f64;
        let size = (width_in * dpi, height_in * dpi);
        let origin = (size.0 * MARGIN_X, size.1 * MARGIN_Y);
        let canvas_w = (size.0 + 2.0 * origin.0).ceil();
        let canvas_h = (size.1 + 2.0 * origin.1).ceil();
        if !(canvas_w >= 1.0 && canvas_h >= 1.0 && canvas_w < u32::MAX as f64 && canvas_h < u32::MAX as f64) {
            return Err(anyhow!("Invalid figure size {}x{} px", size.0, size.1));
        }
        let image = RgbaImage::from_pixel(canvas_w as u32, canvas_h as u32, WHITE);
        debug!(width = image.width(), height = image.height(), "Allocated canvas");
        Ok(Self {
            image,
            dpi,
            origin,
            size,
            font,
            content: None,
        })
    }

    pub fn pt(&self, points: f64) -> f32 {
        (points * self.dpi / 72.0) as f32
    }

    // origin bottom-left
    pub fn fig_to_px(&self, fx: f64, fy: f64) -> (f32, f32) {
        (
            (self.origin.0 + fx * self.size.0) as f32,
            (self.origin.1 + (1.0 - fy) * self.size.1) as f32,
        )
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn touch(&mut self, rect: PixelRect) {
        self.content = Some(match self.content {
            Some(existing) => existing.union(rect),
            None => rect,
        });
    }

    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if x < self.image.width() && y < self.image.height() {
            self.image.get_pixel_mut(x, y).blend(&color);
        }
    }

    // for layers painted through blend_pixel
    pub fn mark(&mut self, rect: PixelRect) {
        self.touch(rect);
    }

    pub fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>) {
        let x0 = rect.x0.round().max(0.0) as u32;
        let y0 = rect.y0.round().max(0.0) as u32;
        let x1 = (rect.x1.round().max(0.0) as u32).min(self.image.width());
        let y1 = (rect.y1.round().max(0.0) as u32).min(self.image.height());
        for y in y0..y1 {
            for x in x0..x1 {
                self.image.get_pixel_mut(x, y).blend(&color);
            }
        }
        self.touch(rect);
    }

    pub fn stroke_rect(&mut self, rect: PixelRect, color: Rgba<u8>, width: f32) {
        let corners = [(rect.x0, rect.y0), (rect.x1, rect.y0), (rect.x1, rect.y1), (rect.x0, rect.y1)];
        self.stroke_path(&corners, true, color, width);
    }

    pub fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>) {
        if !(radius > 0.0) {
            return;
        }
        let r2 = radius * radius;
        let x0 = (center.0 - radius).floor().max(0.0) as u32;
        let y0 = (center.1 - radius).floor().max(0.0) as u32;
        let x1 = ((center.0 + radius).ceil().max(0.0) as u32).min(self.image.width());
        let y1 = ((center.1 + radius).ceil().max(0.0) as u32).min(self.image.height());
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - center.0;
                let dy = y as f32 + 0.5 - center.1;
                if dx * dx + dy * dy <= r2 {
                    self.image.get_pixel_mut(x, y).blend(&color);
                }
            }
        }
        self.touch(PixelRect {
            x0: center.0 - radius,
            y0: center.1 - radius,
            x1: center.0 + radius,
            y1: center.1 + radius,
        });
    }

    pub fn fill_polygon(&mut self, points: &[(f32, f32)], color: Rgba<u8>) {
        let mut poly: Vec<Point<i32>> = points
            .iter()
            .map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32))
            .collect();
        poly.dedup();
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            return;
        }
        draw_polygon_mut(&mut self.image, &poly, color);
        if let Some(rect) = bounds_of(points) {
            self.touch(rect);
        }
    }

    pub fn stroke_path(&mut self, points: &[(f32, f32)], closed: bool, color: Rgba<u8>, width: f32) {
        for pair in points.windows(2) {
            self.thick_segment(pair[0], pair[1], color, width);
        }
        if closed && points.len() > 2 {
            self.thick_segment(points[points.len() - 1], points[0], color, width);
        }
        if let Some(rect) = bounds_of(points) {
            let half = width / 2.0;
            self.touch(PixelRect {
                x0: rect.x0 - half,
                y0: rect.y0 - half,
                x1: rect.x1 + half,
                y1: rect.y1 + half,
            });
        }
    }

    pub fn dashed_line(&mut self, start: (f32, f32), end: (f32, f32), color: Rgba<u8>, width: f32) {
        // matplotlib "--": 3.7 on, 1.6 off, in line widths
        let dash = (3.7 * width).max(2.0);
        let gap = (1.6 * width).max(1.0);
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let length = (dx * dx + dy * dy).sqrt();
        if length < 0.001 {
            return;
        }
        let (ux, uy) = (dx / length, dy / length);
        let mut at = 0.0;
        while at < length {
            let stop = (at + dash).min(length);
            self.thick_segment(
                (start.0 + ux * at, start.1 + uy * at),
                (start.0 + ux * stop, start.1 + uy * stop),
                color,
                width,
            );
            at = stop + gap;
        }
        self.touch(PixelRect {
            x0: start.0.min(end.0),
            y0: start.1.min(end.1),
            x1: start.0.max(end.0),
            y1: start.1.max(end.1),
        });
    }

    fn thick_segment(&mut self, start: (f32, f32), end: (f32, f32), color: Rgba<u8>, width: f32) {
        if width <= 1.5 {
            draw_line_segment_mut(&mut self.image, start, end, color);
            return;
        }

        let radius = (width / 2.0).round().max(1.0) as i32;
        let dx = end.0 - start.0;
        let dy = end.1 - start.1;
        let length = (dx * dx + dy * dy).sqrt();

        if length < 0.001 {
            draw_filled_circle_mut(&mut self.image, (start.0 as i32, start.1 as i32), radius, color);
            return;
        }

        let step_size = (radius as f32 * 0.5).max(0.5);
        let num_steps = (length / step_size).ceil() as i32;
        let step_x = dx * step_size / length;
        let step_y = dy * step_size / length;

        for i in 0..=num_steps {
            let t = i as f32;
            let x = start.0 + t * step_x;
            let y = start.1 + t * step_y;
            draw_filled_circle_mut(&mut self.image, (x.round() as i32, y.round() as i32), radius, color);
        }
        draw_filled_circle_mut(&mut self.image, (end.0.round() as i32, end.1.round() as i32), radius, color);
    }

    pub fn measure_text(&self, text: &str, size_pt: f64) -> Option<(f32, f32)> {
        let font = self.font.as_ref()?;
        let px = self.pt(size_pt);
        let scale = PxScale::from(px);
        let lines: Vec<&str> = text.split('\n').collect();
        let width = lines
            .iter()
            .map(|line| text_size(scale, font, line).0 as f32)
            .fold(0.0, f32::max);
        let height = px * (1.0 + LINE_SPACING * (lines.len() - 1) as f32);
        Some((width, height))
    }

    pub fn text(
        &mut self,
        text: &str,
        at: (f32, f32),
        size_pt: f64,
        color: Rgba<u8>,
        halign: HAlign,
        valign: VAlign,
    ) -> Option<PixelRect> {
        let (width, height) = self.measure_text(text, size_pt)?;
        let font = self.font.clone()?;
        let px = self.pt(size_pt);
        let scale = PxScale::from(px);

        let y0 = match valign {
            VAlign::Top => at.1,
            VAlign::Center => at.1 - height / 2.0,
            VAlign::Bottom => at.1 - height,
        };
        let block_x0 = match halign {
            HAlign::Left => at.0,
            HAlign::Center => at.0 - width / 2.0,
            HAlign::Right => at.0 - width,
        };

        for (i, line) in text.split('\n').enumerate() {
            let line_w = text_size(scale, &font, line).0 as f32;
            let x = match halign {
                HAlign::Left => at.0,
                HAlign::Center => at.0 - line_w / 2.0,
                HAlign::Right => at.0 - line_w,
            };
            let y = y0 + i as f32 * px * LINE_SPACING;
            draw_text_mut(&mut self.image, color, x.round() as i32, y.round() as i32, scale, &font, line);
        }

        let rect = PixelRect {
            x0: block_x0,
            y0,
            x1: block_x0 + width,
            y1: y0 + height,
        };
        self.touch(rect);
        Some(rect)
    }

    pub fn save(&self, path: &Path) -> Result<(u32, u32)> {
        let content = self.content.ok_or_else(|| anyhow!("Nothing was drawn"))?;
        let pad = (PAD_INCHES * self.dpi) as f32;
        let (w, h) = (self.image.width() as f32, self.image.height() as f32);
        let x0 = (content.x0 - pad).floor().clamp(0.0, w - 1.0) as u32;
        let y0 = (content.y0 - pad).floor().clamp(0.0, h - 1.0) as u32;
        let x1 = (content.x1 + pad).ceil().clamp(x0 as f32 + 1.0, w) as u32;
        let y1 = (content.y1 + pad).ceil().clamp(y0 as f32 + 1.0, h) as u32;

        let cropped = image::imageops::crop_imm(&self.image, x0, y0, x1 - x0, y1 - y0).to_image();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
        cropped
            .save(path)
            .with_context(|| format!("Failed to write image: {:?}", path))?;
        Ok((cropped.width(), cropped.height()))
    }
}

fn bounds_of(points: &[(f32, f32)]) -> Option<PixelRect> {
    let (first, rest) = points.split_first()?;
    let start = PixelRect { x0: first.0, y0: first.1, x1: first.0, y1: first.1 };
    Some(rest.iter().fold(start, |r, &(x, y)| PixelRect {
        x0: r.x0.min(x),
        y0: r.y0.min(y),
        x1: r.x1.max(x),
        y1: r.y1.max(y),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oranges_runs_light_to_dark() {
        assert_eq!(oranges(0.0), Rgba([0xff, 0xf5, 0xeb, 255]));
        assert_eq!(oranges(1.0), Rgba([0x7f, 0x27, 0x04, 255]));
        assert!(oranges(0.3).0[1] > oranges(0.7).0[1]);
    }

    #[test]
    fn figure_fraction_maps_inside_margin() {
        let fig = Figure::new(2.0, 1.0, 100, None).unwrap();
        assert_eq!(fig.fig_to_px(0.0, 1.0), (50.0, 10.0));
        assert_eq!(fig.fig_to_px(1.0, 0.0), (250.0, 110.0));
        assert_eq!(fig.pt(72.0), 100.0);
    }

    #[test]
    fn translucent_circle_blends_with_background() {
        let mut fig = Figure::new(1.0, 1.0, 100, None).unwrap();
        fig.fill_circle((60.0, 60.0), 5.0, with_alpha(RED, 0.5));
        let px = fig.image().get_pixel(60, 60);
        assert_eq!(px.0[0], 255);
        assert!(px.0[1] > 100 && px.0[1] < 160);
    }

    #[test]
    fn save_crops_to_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut fig = Figure::new(2.0, 2.0, 50, None).unwrap();
        fig.fill_rect(PixelRect { x0: 40.0, y0: 40.0, x1: 60.0, y1: 50.0 }, BLACK);
        let (w, h) = fig.save(&dir.path().join("out").join("crop.png")).unwrap();
        // 0.1 in padding at 50 dpi is 5 px per side
        assert_eq!((w, h), (30, 20));
    }

    #[test]
    fn text_without_font_is_skipped() {
        let mut fig = Figure::new(1.0, 1.0, 72, None).unwrap();
        assert!(fig.text("N", (10.0, 10.0), 10.0, BLACK, HAlign::Center, VAlign::Center).is_none());
        assert!(fig.save(Path::new("unused.png")).is_err());
    }
}
