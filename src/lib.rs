pub mod annotate;
pub mod canvas;
pub mod config;
pub mod data;
pub mod density;
pub mod processing;
pub mod projection;
pub mod render;
pub mod types;

use anyhow::Result;
use std::path::Path;

pub use render::RenderSummary;

pub fn generate(config: &config::AppConfig, output: &Path) -> Result<RenderSummary> {
    let neighborhoods = data::load_neighborhoods(config)?;
    let (streets, table) = data::load_street_data(config)?;

    let plotter = render::MapPlotter::new(&config.map, &neighborhoods, &streets, &table);
    plotter.plot(output)
}
