use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use metobs_core::{AppError, Config};
use metobs_spheres::{GeoPoint, NavigationService, NearestFilter, SphereError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// MetObs sphere navigation - query the panoramic sphere feed
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spheres closest to a coordinate
    Nearest {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Number of spheres to return
        #[arg(long)]
        count: Option<usize>,
        /// Ignore spheres farther than this many meters
        #[arg(long)]
        max_distance: Option<f64>,
        /// Only spheres from this project
        #[arg(long)]
        project: Option<String>,
        /// Sphere ids to leave out
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// A sphere with its navigation links
    Panorama {
        id: String,
        /// Link search radius in meters
        #[arg(long, allow_hyphen_values = true)]
        max_range: Option<f64>,
        #[arg(long)]
        sectors: Option<u32>,
    },
    /// Dump every sphere as a GeoJSON FeatureCollection
    Geojson,
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    metobs_core::init()?;

    let cli = Cli::parse();
    let (config, validation) = Config::load_validated(cli.config.as_deref())?;

    let output = match cli.command {
        Command::Nearest {
            lat,
            lon,
            count,
            max_distance,
            project,
            exclude,
        } => {
            let filter = NearestFilter {
                max_distance_m: max_distance,
                project,
                exclude,
            };
            let nav = service(&config)?;
            let k = count.unwrap_or(config.spheres.default_nearest_count);
            let nearest = nav.nearest(GeoPoint::new(lat, lon), k, &filter).await.map_err(report)?;
            serde_json::to_string_pretty(&nearest)?
        }
        Command::Panorama {
            id,
            max_range,
            sectors,
        } => {
            let nav = service(&config)?;
            let panorama = nav.panorama(&id, max_range, sectors).await.map_err(report)?;
            serde_json::to_string_pretty(&panorama)?
        }
        Command::Geojson => {
            let nav = service(&config)?;
            let geojson = nav.geojson().await.map_err(report)?;
            serde_json::to_string_pretty(&geojson)?
        }
        Command::CheckConfig => {
            for warning in &validation.warnings {
                println!("warning: {}", warning);
            }
            format!("{:#?}", config.spheres)
        }
    };

    println!("{}", output);
    Ok(())
}

fn service(config: &Config) -> Result<NavigationService> {
    NavigationService::from_config(&config.spheres)
}

/// Print the client-safe message, keep the detail for the error chain
fn report(err: SphereError) -> anyhow::Error {
    let err = AppError::from(err);
    eprintln!("{}", err.user_message());
    anyhow::Error::new(err)
}
