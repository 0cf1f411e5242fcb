use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mobnet::collect::global_variables::*;
use mobnet::config::{
    AccessibilityConfig, AnalysisConfig, ExtractConfig, NetworkConfig, PipelineConfig,
    RenderConfig,
};
use mobnet::network::{DistanceMethod, GraphMethod};
use mobnet::pipeline::{self, VisualizeInputs};

#[derive(Parser, Debug)]
#[command(
    name = "mobnet",
    version,
    about = "Building proximity networks from CityGML data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract building footprints from a CityGML file into a CSV table
    Extract {
        /// Input CityGML file
        #[arg(long)]
        input: PathBuf,
        /// Output CSV; footprints go to `<stem>_footprints.geojson` beside it
        #[arg(long)]
        output: PathBuf,
        /// Storey height used when only a storey count is given
        #[arg(long, default_value_t = DEFAULT_STOREY_HEIGHT_M)]
        storey_height: f64,
    },
    /// Merge the per-file footprint GeoJSON files of a directory
    Combine {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Build the proximity graph from a building table
    Build {
        #[arg(long)]
        input: PathBuf,
        /// Output graph JSON
        #[arg(long)]
        output: PathBuf,
        /// Distance threshold in meters
        #[arg(long, default_value_t = DEFAULT_NETWORK_THRESHOLD_M)]
        threshold: f64,
        #[arg(long, value_enum, default_value_t = GraphMethod::Distance)]
        method: GraphMethod,
        /// Use footprint edge-to-edge distance instead of centroid distance
        #[arg(long)]
        use_edge_distance: bool,
        #[arg(long, value_enum, default_value_t = DistanceMethod::Haversine)]
        distance_method: DistanceMethod,
    },
    /// Compute centrality metrics and shortest paths of a graph
    Analyze {
        /// Input graph JSON
        #[arg(long)]
        input: PathBuf,
        /// Output metrics CSV
        #[arg(long)]
        output: PathBuf,
        /// Output shortest paths JSON
        #[arg(long)]
        paths: Option<PathBuf>,
        /// Maximum number of node pairs in the shortest path set
        #[arg(long, default_value_t = DEFAULT_MAX_PATHS)]
        max_paths: usize,
    },
    /// Score building accessibility
    Accessibility {
        /// Input building CSV
        #[arg(long)]
        input: PathBuf,
        /// Graph JSON
        #[arg(long)]
        graph: PathBuf,
        /// Output CSV
        #[arg(long)]
        output: PathBuf,
        /// Accessibility threshold in meters
        #[arg(long, default_value_t = DEFAULT_ACCESSIBILITY_THRESHOLD_M)]
        threshold: f64,
    },
    /// Draw the SVG charts
    Visualize {
        #[arg(long)]
        buildings: PathBuf,
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        metrics: Option<PathBuf>,
        #[arg(long)]
        accessibility: Option<PathBuf>,
        #[arg(long)]
        paths: Option<PathBuf>,
        /// Output directory
        #[arg(long)]
        output: PathBuf,
    },
    /// Run every stage on one or more CityGML files or directories
    Run {
        #[arg(long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,
        /// Chart directory; intermediate files go to a sibling `processed` directory
        #[arg(long, default_value = OUTPUT_PATH)]
        output: PathBuf,
        /// Network distance threshold in meters
        #[arg(long)]
        threshold: Option<f64>,
        /// Accessibility distance threshold in meters
        #[arg(long)]
        distance_threshold: Option<f64>,
        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            input,
            output,
            storey_height,
        } => {
            let config = ExtractConfig {
                default_storey_height: storey_height,
            };
            pipeline::extract(&input, &output, &config)?;
        }
        Commands::Combine { input, output } => {
            pipeline::combine(&input, &output)?;
        }
        Commands::Build {
            input,
            output,
            threshold,
            method,
            use_edge_distance,
            distance_method,
        } => {
            let config = NetworkConfig {
                threshold_m: threshold,
                method,
                distance_method,
                use_edge_distance,
            };
            pipeline::build(&input, &output, &config)?;
        }
        Commands::Analyze {
            input,
            output,
            paths,
            max_paths,
        } => {
            let config = AnalysisConfig {
                max_paths,
                ..AnalysisConfig::default()
            };
            pipeline::analyze(&input, &output, paths.as_deref(), &config)?;
        }
        Commands::Accessibility {
            input,
            graph,
            output,
            threshold,
        } => {
            let config = AccessibilityConfig {
                threshold_m: threshold,
            };
            pipeline::accessibility(&input, &graph, &output, &config)?;
        }
        Commands::Visualize {
            buildings,
            graph,
            metrics,
            accessibility,
            paths,
            output,
        } => {
            let optional = VisualizeInputs {
                metrics,
                accessibility,
                paths,
            };
            let written = pipeline::visualize(
                &buildings,
                &graph,
                &optional,
                &output,
                &RenderConfig::default(),
            )?;
            log::info!("Wrote {} charts to {}", written.len(), output.display());
        }
        Commands::Run {
            input,
            output,
            threshold,
            distance_threshold,
            config,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_json_file(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(threshold) = threshold {
                config.network.threshold_m = threshold;
            }
            if let Some(threshold) = distance_threshold {
                config.accessibility.threshold_m = threshold;
            }
            pipeline::run(&input, &output, &config)?;
        }
    }

    Ok(())
}
