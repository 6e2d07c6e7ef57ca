//! The subtraction driver: load two datasets, estimate their difference,
//! threshold it, and persist every product.

use crate::combine::split_directional;
use crate::data::{FociDataset, StatVolume, VolumeSpace};
use crate::error::Result;
use crate::estimate::{estimate_subtraction, SubtractionParams};
use crate::io::write_nifti;
use crate::threshold::{threshold_map, ThresholdParams, ThresholdReport};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Structured output naming for a contrast.
///
/// Carried explicitly instead of being re-derived from file paths; defaults
/// to the dataset names recorded at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastName {
    /// The dataset whose activation is subtracted *from* (group A).
    pub minuend: String,
    /// The dataset being subtracted (group B).
    pub subtrahend: String,
}

impl ContrastName {
    /// Name a contrast explicitly.
    pub fn new(minuend: impl Into<String>, subtrahend: impl Into<String>) -> Self {
        Self {
            minuend: minuend.into(),
            subtrahend: subtrahend.into(),
        }
    }

    /// Derive the name from two loaded datasets.
    pub fn from_datasets(a: &FociDataset, b: &FociDataset) -> Self {
        Self::new(a.name(), b.name())
    }

    /// Common stem of every output file: `{minuend}_minus_{subtrahend}`.
    pub fn stem(&self) -> String {
        format!("{}_minus_{}", self.minuend, self.subtrahend)
    }

    /// File name of the unthresholded z map.
    pub fn z_file(&self) -> String {
        format!("{}_z.nii.gz", self.stem())
    }

    /// File name of the thresholded z map.
    pub fn z_thresh_file(&self) -> String {
        format!("{}_z_thresh.nii.gz", self.stem())
    }

    /// File names of the two directional maps.
    pub fn directional_files(&self) -> (String, String) {
        (
            format!("{}_gt_{}_z_thresh.nii.gz", self.minuend, self.subtrahend),
            format!("{}_gt_{}_z_thresh.nii.gz", self.subtrahend, self.minuend),
        )
    }

    /// File name of the JSON run report.
    pub fn report_file(&self) -> String {
        format!("{}_report.json", self.stem())
    }
}

/// Serializable description of a voxel grid, for config files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpaceSpec {
    /// Grid dimensions.
    pub shape: [usize; 3],
    /// Isotropic voxel size in mm.
    pub voxel_size_mm: f64,
    /// mm coordinate of voxel (0, 0, 0).
    pub origin_mm: [f64; 3],
}

impl SpaceSpec {
    /// Build the concrete space.
    pub fn to_space(&self) -> Result<VolumeSpace> {
        VolumeSpace::isotropic(
            (self.shape[0], self.shape[1], self.shape[2]),
            self.voxel_size_mm,
            self.origin_mm,
        )
    }
}

/// Configuration of a full subtraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtractionConfig {
    /// Sleuth file of group A (the minuend).
    pub dataset_a: PathBuf,
    /// Sleuth file of group B (the subtrahend).
    pub dataset_b: PathBuf,
    /// Dual threshold applied to the z map.
    pub threshold: ThresholdParams,
    /// Number of permutations for the null.
    pub n_iterations: usize,
    /// Seed for the permutation generator; when omitted one is drawn from
    /// the system clock and recorded in the outcome.
    pub seed: Option<u64>,
    /// Run permutations in parallel.
    pub parallel: bool,
    /// Directory receiving every output file.
    pub output_dir: PathBuf,
    /// Analysis grid; the MNI152 2 mm grid when omitted.
    pub space: Option<SpaceSpec>,
    /// Output naming override.
    pub name: Option<ContrastName>,
    /// Also write the two directional maps of the thresholded contrast.
    pub write_directional: bool,
}

impl SubtractionConfig {
    /// A configuration with default statistics for the given inputs.
    pub fn new(
        dataset_a: impl Into<PathBuf>,
        dataset_b: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dataset_a: dataset_a.into(),
            dataset_b: dataset_b.into(),
            threshold: ThresholdParams::default(),
            n_iterations: SubtractionParams::default().n_iterations,
            seed: None,
            parallel: true,
            output_dir: output_dir.into(),
            space: None,
            name: None,
            write_directional: false,
        }
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

/// Everything a subtraction run produced.
#[derive(Debug)]
pub struct SubtractionOutcome {
    /// Unthresholded z map.
    pub z_map: StatVolume,
    /// Dual-thresholded z map.
    pub z_thresh: StatVolume,
    /// What the thresholding pass did (critical value, cluster extent,
    /// retained counts).
    pub report: ThresholdReport,
    /// The seed actually used.
    pub seed: u64,
    /// Path of the persisted z map.
    pub z_path: PathBuf,
    /// Path of the persisted thresholded map.
    pub z_thresh_path: PathBuf,
    /// Paths of the directional maps, when requested.
    pub directional_paths: Option<(PathBuf, PathBuf)>,
    /// Path of the JSON run report.
    pub report_path: PathBuf,
}

/// Per-run JSON report persisted next to the maps.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    contrast: &'a ContrastName,
    seed: u64,
    n_iterations: usize,
    threshold: &'a ThresholdParams,
    result: &'a ThresholdReport,
}

/// Run the full subtraction pipeline.
///
/// Loads both datasets (aborting on parse failure), estimates the
/// group-difference z map, persists it, applies the dual threshold,
/// persists that too, and returns both maps with the threshold report.
pub fn run_subtraction(config: &SubtractionConfig) -> Result<SubtractionOutcome> {
    config.threshold.validate()?;

    let a = FociDataset::from_sleuth(&config.dataset_a)?;
    let b = FociDataset::from_sleuth(&config.dataset_b)?;
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| ContrastName::from_datasets(&a, &b));
    let space = match &config.space {
        Some(spec) => spec.to_space()?,
        None => VolumeSpace::mni152_2mm(),
    };

    let seed = match config.seed {
        Some(seed) => seed,
        None => {
            let seed = clock_seed();
            info!(seed, "No seed supplied; drew one from the system clock");
            seed
        }
    };

    // The null can only resolve p-values down to 1 / (n_iterations + 1).
    let resolution = 1.0 / (config.n_iterations as f64 + 1.0);
    if resolution > config.threshold.voxel_p {
        warn!(
            n_iterations = config.n_iterations,
            voxel_p = config.threshold.voxel_p,
            "Permutation count is too low to resolve the requested voxel threshold; \
             output is still produced but its adequacy is the caller's judgement"
        );
    }

    let params = SubtractionParams {
        n_iterations: config.n_iterations,
        seed,
        parallel: config.parallel,
    };
    let z_map = estimate_subtraction(&a, &b, &space, &params)?;

    std::fs::create_dir_all(&config.output_dir)?;
    let z_path = config.output_dir.join(name.z_file());
    write_nifti(&z_path, &z_map)?;
    info!(path = %z_path.display(), "Wrote unthresholded z map");

    let (z_thresh, report) = threshold_map(&z_map, &config.threshold)?;
    let z_thresh_path = config.output_dir.join(name.z_thresh_file());
    write_nifti(&z_thresh_path, &z_thresh)?;
    info!(
        path = %z_thresh_path.display(),
        critical_value = report.critical_value,
        min_cluster_voxels = report.min_cluster_voxels,
        "Wrote thresholded z map"
    );

    let directional_paths = if config.write_directional {
        let maps = split_directional(&z_thresh);
        let (file_ab, file_ba) = name.directional_files();
        let path_ab = config.output_dir.join(file_ab);
        let path_ba = config.output_dir.join(file_ba);
        write_nifti(&path_ab, &maps.a_gt_b)?;
        write_nifti(&path_ba, &maps.b_gt_a)?;
        Some((path_ab, path_ba))
    } else {
        None
    };

    let report_path = config.output_dir.join(name.report_file());
    let run_report = RunReport {
        contrast: &name,
        seed,
        n_iterations: config.n_iterations,
        threshold: &config.threshold,
        result: &report,
    };
    let mut writer = BufWriter::new(File::create(&report_path)?);
    serde_json::to_writer_pretty(&mut writer, &run_report)?;
    writer.flush()?;

    Ok(SubtractionOutcome {
        z_map,
        z_thresh,
        report,
        seed,
        z_path,
        z_thresh_path,
        directional_paths,
        report_path,
    })
}

/// Nondeterministic seed for unseeded runs.
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5EED_5EED_5EED_5EED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contrast_naming() {
        let name = ContrastName::new("control", "patient");
        assert_eq!(name.stem(), "control_minus_patient");
        assert_eq!(name.z_file(), "control_minus_patient_z.nii.gz");
        assert_eq!(name.z_thresh_file(), "control_minus_patient_z_thresh.nii.gz");
        let (ab, ba) = name.directional_files();
        assert_eq!(ab, "control_gt_patient_z_thresh.nii.gz");
        assert_eq!(ba, "patient_gt_control_z_thresh.nii.gz");
    }

    #[test]
    fn test_space_spec_builds_expected_grid() {
        let spec = SpaceSpec {
            shape: [10, 12, 14],
            voxel_size_mm: 2.0,
            origin_mm: [-10.0, -12.0, -14.0],
        };
        let space = spec.to_space().unwrap();
        assert_eq!(space.shape(), (10, 12, 14));
        assert_eq!(space.voxel_volume_mm3(), 8.0);
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = SubtractionConfig::new("a.txt", "b.txt", "out");
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: SubtractionConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.dataset_a, config.dataset_a);
        assert_eq!(parsed.n_iterations, config.n_iterations);
        assert!(parsed.seed.is_none());
    }
}
