use clap::{Parser, Subcommand};
use std::path::PathBuf;
use story_map::annotate::Extent;
use story_map::config::AppConfig;
use story_map::processing::WeightRange;
use story_map::{data, generate};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the neighborhood map to a PNG
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Overrides output.image from the config
        #[arg(short, long, value_name = "PNG")]
        output: Option<PathBuf>,
    },
    /// Load both datasets and print what would be drawn
    Inspect {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render { config, output } => {
            let app_config = AppConfig::load_from_file(config)?;
            let output = output.clone().unwrap_or_else(|| app_config.output.image.clone());

            generate(&app_config, &output)?;

            println!("Map saved to {}", output.display());
        }
        Commands::Inspect { config } => {
            let app_config = AppConfig::load_from_file(config)?;

            let neighborhoods = data::load_neighborhoods(&app_config)?;
            let (streets, _) = data::load_street_data(&app_config)?;
            let extent = Extent::of_polygons(neighborhoods.iter().map(|n| &n.geometry))?;

            println!("Neighborhoods: {}", neighborhoods.len());
            println!(
                "Bounds: lon {:.5}..{:.5}, lat {:.5}..{:.5}",
                extent.min_x, extent.max_x, extent.min_y, extent.max_y
            );
            println!("Locations: {}", streets.len());
            let weights: Vec<f64> = streets.iter().map(|s| s.weight).collect();
            match WeightRange::from_weights(&weights) {
                Ok(range) => println!("Weights: {}..{}", range.min, range.max),
                Err(e) => println!("Weights: {}", e),
            }
        }
    }

    Ok(())
}
