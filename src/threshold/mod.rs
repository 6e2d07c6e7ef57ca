//! Dual voxel/cluster thresholding of statistical maps.
//!
//! A map survives in two steps: every voxel must exceed the critical
//! statistic value derived from the voxel-level false-positive rate, and the
//! surviving voxels must belong to a connected component at least as large
//! as the cluster-extent threshold. Everything else is zeroed; retained
//! voxels keep their original signed values.

mod cluster;

pub use cluster::{label_clusters, ClusterLabels, Connectivity};

use crate::data::StatVolume;
use crate::error::{CbmaError, Result};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, warn};

/// Parameters of the combined voxel/cluster threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdParams {
    /// Voxel-level false-positive rate, in (0, 1).
    pub voxel_p: f64,
    /// Minimum cluster extent in mm^3.
    pub cluster_size_mm3: f64,
    /// Two-sided thresholding keeps |v| >= critical; one-sided keeps
    /// v >= critical.
    pub two_sided: bool,
    /// Neighborhood convention for cluster labeling.
    pub connectivity: Connectivity,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            voxel_p: 0.001,
            cluster_size_mm3: 200.0,
            two_sided: true,
            connectivity: Connectivity::default(),
        }
    }
}

impl ThresholdParams {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.voxel_p > 0.0 && self.voxel_p < 1.0) {
            return Err(CbmaError::InvalidParameter(format!(
                "voxel_p must be in (0, 1), got {}",
                self.voxel_p
            )));
        }
        if self.cluster_size_mm3 < 0.0 || !self.cluster_size_mm3.is_finite() {
            return Err(CbmaError::InvalidParameter(format!(
                "cluster_size_mm3 must be non-negative, got {}",
                self.cluster_size_mm3
            )));
        }
        Ok(())
    }

    /// Critical statistic value implied by `voxel_p` on a standard normal
    /// scale. Derived, not an input; reported back to callers for
    /// reproducibility.
    pub fn critical_value(&self) -> f64 {
        let normal = Normal::new(0.0, 1.0).unwrap();
        if self.two_sided {
            normal.inverse_cdf(1.0 - self.voxel_p / 2.0)
        } else {
            normal.inverse_cdf(1.0 - self.voxel_p)
        }
    }

    /// Minimum cluster extent in voxels for a given voxel volume
    /// (floor division).
    pub fn min_cluster_voxels(&self, voxel_volume_mm3: f64) -> usize {
        (self.cluster_size_mm3 / voxel_volume_mm3).floor() as usize
    }
}

/// What a thresholding pass actually did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdReport {
    /// Critical statistic value applied per voxel.
    pub critical_value: f64,
    /// Minimum cluster extent in voxels.
    pub min_cluster_voxels: usize,
    /// Voxels passing the statistic threshold, before cluster filtering.
    pub n_voxels_supra: usize,
    /// Voxels retained after cluster filtering.
    pub n_voxels_retained: usize,
    /// Clusters meeting the extent criterion.
    pub n_clusters_retained: usize,
    /// Clusters removed for being too small.
    pub n_clusters_removed: usize,
    /// The input map was all-zero and was returned unchanged.
    pub empty_input: bool,
}

/// Apply the combined voxel-level and cluster-extent threshold.
///
/// An all-zero input is not an error: the map is returned unchanged and the
/// report carries `empty_input`, with a warning on the side channel.
/// Emptiness is judged on the raw input, before the statistic threshold.
pub fn threshold_map(
    map: &StatVolume,
    params: &ThresholdParams,
) -> Result<(StatVolume, ThresholdReport)> {
    params.validate()?;

    let critical_value = params.critical_value();
    let voxel_volume = map.space().voxel_volume_mm3();
    let min_cluster_voxels = params.min_cluster_voxels(voxel_volume);

    if map.is_all_zero() {
        warn!("Input map is empty (all voxels zero); returning it unchanged");
        let report = ThresholdReport {
            critical_value,
            min_cluster_voxels,
            n_voxels_supra: 0,
            n_voxels_retained: 0,
            n_clusters_retained: 0,
            n_clusters_removed: 0,
            empty_input: true,
        };
        return Ok((map.clone(), report));
    }

    let mask = if params.two_sided {
        map.data().mapv(|v| v.abs() >= critical_value)
    } else {
        map.data().mapv(|v| v >= critical_value)
    };
    let n_voxels_supra = mask.iter().filter(|&&m| m).count();

    let labeled = label_clusters(&mask, params.connectivity);
    let keep: Vec<bool> = labeled
        .sizes()
        .iter()
        .map(|&size| size >= min_cluster_voxels)
        .collect();
    let n_clusters_retained = keep.iter().filter(|&&k| k).count();
    let n_clusters_removed = labeled.n_clusters() - n_clusters_retained;

    let mut data = Array3::zeros(map.shape());
    let mut n_voxels_retained = 0usize;
    for ((idx, &label), &value) in labeled.labels().indexed_iter().zip(map.data().iter()) {
        if label != 0 && keep[(label - 1) as usize] {
            data[idx] = value;
            n_voxels_retained += 1;
        }
    }

    debug!(
        critical_value,
        min_cluster_voxels,
        n_voxels_supra,
        n_voxels_retained,
        "Applied dual threshold"
    );

    let thresholded = StatVolume::new(data, map.space().clone())?;
    let report = ThresholdReport {
        critical_value,
        min_cluster_voxels,
        n_voxels_supra,
        n_voxels_retained,
        n_clusters_retained,
        n_clusters_removed,
        empty_input: false,
    };
    Ok((thresholded, report))
}
