//! CBMA - Coordinate-Based Meta-Analysis contrast CLI.
//!
//! Command-line interface for running subtraction analyses, thresholding
//! existing maps, and combining thresholded results.

use cbma_contrast::prelude::*;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CLI-friendly connectivity enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliConnectivity {
    /// 6 neighbors sharing a face
    Faces,
    /// 18 neighbors sharing a face or an edge
    Edges,
    /// 26 neighbors sharing a face, edge, or corner
    Corners,
}

impl From<CliConnectivity> for Connectivity {
    fn from(c: CliConnectivity) -> Self {
        match c {
            CliConnectivity::Faces => Connectivity::Faces,
            CliConnectivity::Edges => Connectivity::Edges,
            CliConnectivity::Corners => Connectivity::Corners,
        }
    }
}

/// Coordinate-based meta-analysis contrasts
#[derive(Parser)]
#[command(name = "cbma")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full subtraction analysis between two Sleuth foci files
    Subtract {
        /// Path to a YAML run configuration; flags below are ignored if set
        #[arg(short = 'C', long)]
        config: Option<PathBuf>,

        /// Sleuth file of group A (the minuend)
        #[arg(short = 'a', long, required_unless_present = "config")]
        dataset_a: Option<PathBuf>,

        /// Sleuth file of group B (the subtrahend)
        #[arg(short = 'b', long, required_unless_present = "config")]
        dataset_b: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "cbma_out")]
        output_dir: PathBuf,

        /// Voxel-level false-positive rate
        #[arg(long, default_value = "0.001")]
        voxel_p: f64,

        /// Minimum cluster extent in mm^3
        #[arg(long, default_value = "200")]
        cluster_mm3: f64,

        /// Threshold one-sided instead of two-sided
        #[arg(long)]
        one_sided: bool,

        /// Cluster connectivity convention
        #[arg(long, value_enum, default_value = "faces")]
        connectivity: CliConnectivity,

        /// Number of permutations for the null
        #[arg(short = 'n', long, default_value = "1000")]
        iterations: usize,

        /// Random seed; omit for a clock-drawn seed
        #[arg(long)]
        seed: Option<u64>,

        /// Run permutations serially
        #[arg(long)]
        serial: bool,

        /// Also write the two directional maps
        #[arg(long)]
        directional: bool,
    },

    /// Apply the dual voxel/cluster threshold to an existing z map
    Threshold {
        /// Input .nii.gz map
        #[arg(short, long)]
        input: PathBuf,

        /// Output .nii.gz path
        #[arg(short, long)]
        output: PathBuf,

        /// Voxel-level false-positive rate
        #[arg(long, default_value = "0.001")]
        voxel_p: f64,

        /// Minimum cluster extent in mm^3
        #[arg(long, default_value = "200")]
        cluster_mm3: f64,

        /// Threshold one-sided instead of two-sided
        #[arg(long)]
        one_sided: bool,

        /// Cluster connectivity convention
        #[arg(long, value_enum, default_value = "faces")]
        connectivity: CliConnectivity,
    },

    /// Split a signed map into its two directional halves
    Split {
        /// Input .nii.gz map
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the positive direction
        #[arg(long)]
        positive: PathBuf,

        /// Output path for the (sign-flipped) negative direction
        #[arg(long)]
        negative: PathBuf,
    },

    /// Conjunction of two independently thresholded maps
    Conjunction {
        /// First input .nii.gz map
        #[arg(short = 'x', long)]
        input_x: PathBuf,

        /// Second input .nii.gz map
        #[arg(short = 'y', long)]
        input_y: PathBuf,

        /// Output .nii.gz path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Subtract {
            config,
            dataset_a,
            dataset_b,
            output_dir,
            voxel_p,
            cluster_mm3,
            one_sided,
            connectivity,
            iterations,
            seed,
            serial,
            directional,
        } => cmd_subtract(
            config,
            dataset_a,
            dataset_b,
            output_dir,
            voxel_p,
            cluster_mm3,
            one_sided,
            connectivity,
            iterations,
            seed,
            serial,
            directional,
        ),

        Commands::Threshold {
            input,
            output,
            voxel_p,
            cluster_mm3,
            one_sided,
            connectivity,
        } => cmd_threshold(&input, &output, voxel_p, cluster_mm3, one_sided, connectivity),

        Commands::Split {
            input,
            positive,
            negative,
        } => cmd_split(&input, &positive, &negative),

        Commands::Conjunction {
            input_x,
            input_y,
            output,
        } => cmd_conjunction(&input_x, &input_y, &output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_subtract(
    config_path: Option<PathBuf>,
    dataset_a: Option<PathBuf>,
    dataset_b: Option<PathBuf>,
    output_dir: PathBuf,
    voxel_p: f64,
    cluster_mm3: f64,
    one_sided: bool,
    connectivity: CliConnectivity,
    iterations: usize,
    seed: Option<u64>,
    serial: bool,
    directional: bool,
) -> Result<()> {
    let config = match config_path {
        Some(path) => SubtractionConfig::from_yaml(path)?,
        None => {
            // Presence is enforced by clap when no config file is given.
            let a = dataset_a.ok_or_else(|| {
                CbmaError::InvalidParameter("--dataset-a is required".to_string())
            })?;
            let b = dataset_b.ok_or_else(|| {
                CbmaError::InvalidParameter("--dataset-b is required".to_string())
            })?;
            let mut config = SubtractionConfig::new(a, b, output_dir);
            config.threshold = ThresholdParams {
                voxel_p,
                cluster_size_mm3: cluster_mm3,
                two_sided: !one_sided,
                connectivity: connectivity.into(),
            };
            config.n_iterations = iterations;
            config.seed = seed;
            config.parallel = !serial;
            config.write_directional = directional;
            config
        }
    };

    let outcome = run_subtraction(&config)?;
    println!(
        "Wrote {} and {}",
        outcome.z_path.display(),
        outcome.z_thresh_path.display()
    );
    println!(
        "critical z = {:.4}, min cluster = {} voxels, retained {} voxels in {} clusters (seed {})",
        outcome.report.critical_value,
        outcome.report.min_cluster_voxels,
        outcome.report.n_voxels_retained,
        outcome.report.n_clusters_retained,
        outcome.seed
    );
    Ok(())
}

fn cmd_threshold(
    input: &PathBuf,
    output: &PathBuf,
    voxel_p: f64,
    cluster_mm3: f64,
    one_sided: bool,
    connectivity: CliConnectivity,
) -> Result<()> {
    let map = read_nifti(input)?;
    let params = ThresholdParams {
        voxel_p,
        cluster_size_mm3: cluster_mm3,
        two_sided: !one_sided,
        connectivity: connectivity.into(),
    };
    let (thresholded, report) = threshold_map(&map, &params)?;
    write_nifti(output, &thresholded)?;
    if report.empty_input {
        println!("Input map was empty; wrote it unchanged to {}", output.display());
    } else {
        println!(
            "Wrote {} (critical z = {:.4}, min cluster = {} voxels, {} voxels retained)",
            output.display(),
            report.critical_value,
            report.min_cluster_voxels,
            report.n_voxels_retained
        );
    }
    Ok(())
}

fn cmd_split(input: &PathBuf, positive: &PathBuf, negative: &PathBuf) -> Result<()> {
    let map = read_nifti(input)?;
    let maps = split_directional(&map);
    write_nifti(positive, &maps.a_gt_b)?;
    write_nifti(negative, &maps.b_gt_a)?;
    println!(
        "Wrote {} ({} voxels) and {} ({} voxels)",
        positive.display(),
        maps.a_gt_b.n_nonzero(),
        negative.display(),
        maps.b_gt_a.n_nonzero()
    );
    Ok(())
}

fn cmd_conjunction(input_x: &PathBuf, input_y: &PathBuf, output: &PathBuf) -> Result<()> {
    let x = read_nifti(input_x)?;
    let y = read_nifti(input_y)?;
    let shared = conjunction(&x, &y)?;
    write_nifti(output, &shared)?;
    println!(
        "Wrote {} ({} shared voxels)",
        output.display(),
        shared.n_nonzero()
    );
    Ok(())
}
