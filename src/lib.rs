//! Composable Coordinate-Based Meta-Analysis (CBMA) contrast library.
//!
//! This library provides modular primitives for contrasting coordinate-based
//! neuroimaging meta-analyses: loading study foci, estimating voxel-wise
//! group differences against a permutation null, thresholding the resulting
//! maps, and combining them.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (VolumeSpace, StatVolume, FociDataset)
//! - **estimate**: ALE maps and permutation-based subtraction estimation
//! - **threshold**: Combined voxel-level and cluster-extent thresholding
//! - **combine**: Directional splits and conjunction maps
//! - **contrast**: The subtraction driver tying the stages together
//! - **io**: NIfTI-1 volume persistence
//!
//! # Example
//!
//! ```no_run
//! use cbma_contrast::prelude::*;
//!
//! // Contrast two groups of studies and persist the thresholded result.
//! let mut config = SubtractionConfig::new("control.txt", "patient.txt", "out");
//! config.seed = Some(1234);
//! config.n_iterations = 10000;
//! let outcome = run_subtraction(&config).unwrap();
//! println!(
//!     "critical z = {:.3}, {} voxels retained",
//!     outcome.report.critical_value, outcome.report.n_voxels_retained
//! );
//!
//! // Shared effects across two independently thresholded maps.
//! let x = read_nifti("out/control_minus_patient_z_thresh.nii.gz").unwrap();
//! let y = read_nifti("other/sham_minus_patient_z_thresh.nii.gz").unwrap();
//! let shared = conjunction(&x, &y).unwrap();
//! write_nifti("out/shared_z.nii.gz", &shared).unwrap();
//! ```

pub mod combine;
pub mod contrast;
pub mod data;
pub mod error;
pub mod estimate;
pub mod io;
pub mod threshold;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::combine::{conjunction, split_directional, DirectionalMaps};
    pub use crate::contrast::{
        run_subtraction, ContrastName, SpaceSpec, SubtractionConfig, SubtractionOutcome,
    };
    pub use crate::data::{FociDataset, StatVolume, Study, VolumeSpace};
    pub use crate::error::{CbmaError, Result};
    pub use crate::estimate::{
        estimate_ale, estimate_subtraction, kernel_fwhm_mm, SubtractionParams,
    };
    pub use crate::io::{read_nifti, write_nifti};
    pub use crate::threshold::{
        label_clusters, threshold_map, Connectivity, ThresholdParams, ThresholdReport,
    };
}
