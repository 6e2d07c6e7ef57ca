//! Sample-size-dependent Gaussian kernels for modeled-activation maps.
//!
//! Each reported focus is smoothed with a 3-D Gaussian whose width reflects
//! the spatial uncertainty of the report: a fixed between-template term plus
//! a between-subject term that shrinks with the study's sample size,
//! combined as `fwhm(n) = sqrt(template^2 + subject^2 / n)` with the
//! conventional 5.7 mm / 11.6 mm constants.

use crate::data::VolumeSpace;
use crate::error::{CbmaError, Result};
use nalgebra::{Matrix3, Vector3};

/// Between-template spatial uncertainty, FWHM in mm.
pub const TEMPLATE_FWHM_MM: f64 = 5.7;

/// Between-subject spatial uncertainty, FWHM in mm.
pub const SUBJECT_FWHM_MM: f64 = 11.6;

/// FWHM = sigma * sqrt(8 ln 2).
const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949;

/// Kernel support is truncated at this many standard deviations.
const TRUNCATE_SIGMAS: f64 = 3.0;

/// Kernel FWHM in mm for a study of `sample_size` subjects.
pub fn kernel_fwhm_mm(sample_size: usize) -> f64 {
    let subject = SUBJECT_FWHM_MM * SUBJECT_FWHM_MM / sample_size as f64;
    (TEMPLATE_FWHM_MM * TEMPLATE_FWHM_MM + subject).sqrt()
}

/// A Gaussian kernel rendered onto a specific voxel grid.
///
/// Weights are normalized to sum to 1 over the truncated support, so
/// stamped values are per-voxel activation probabilities.
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    offsets: Vec<(i64, i64, i64)>,
    weights: Vec<f64>,
    fwhm_mm: f64,
}

impl GaussianKernel {
    /// Render the kernel for a study of `sample_size` subjects on `space`.
    pub fn build(space: &VolumeSpace, sample_size: usize) -> Result<Self> {
        if sample_size == 0 {
            return Err(CbmaError::InvalidParameter(
                "Kernel sample size must be at least 1".to_string(),
            ));
        }
        let fwhm_mm = kernel_fwhm_mm(sample_size);
        let sigma_mm = fwhm_mm / FWHM_TO_SIGMA;

        let spatial: Matrix3<f64> = space.affine().fixed_view::<3, 3>(0, 0).clone_owned();
        let radius: Vec<i64> = (0..3)
            .map(|axis| {
                let step = spatial.column(axis).norm();
                (TRUNCATE_SIGMAS * sigma_mm / step).ceil() as i64
            })
            .collect();

        let two_sigma_sq = 2.0 * sigma_mm * sigma_mm;
        let max_r_sq = (TRUNCATE_SIGMAS * sigma_mm) * (TRUNCATE_SIGMAS * sigma_mm);
        let mut offsets = Vec::new();
        let mut weights = Vec::new();
        for di in -radius[0]..=radius[0] {
            for dj in -radius[1]..=radius[1] {
                for dk in -radius[2]..=radius[2] {
                    let mm = spatial * Vector3::new(di as f64, dj as f64, dk as f64);
                    let r_sq = mm.norm_squared();
                    if r_sq > max_r_sq {
                        continue;
                    }
                    offsets.push((di, dj, dk));
                    weights.push((-r_sq / two_sigma_sq).exp());
                }
            }
        }

        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }

        Ok(Self {
            offsets,
            weights,
            fwhm_mm,
        })
    }

    /// Kernel FWHM in mm.
    pub fn fwhm_mm(&self) -> f64 {
        self.fwhm_mm
    }

    /// Number of voxels in the truncated support.
    pub fn support_len(&self) -> usize {
        self.offsets.len()
    }

    /// Iterate over (offset, weight) pairs of the support.
    pub fn support(&self) -> impl Iterator<Item = ((i64, i64, i64), f64)> + '_ {
        self.offsets.iter().copied().zip(self.weights.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fwhm_shrinks_with_sample_size() {
        let small = kernel_fwhm_mm(5);
        let large = kernel_fwhm_mm(50);
        assert!(small > large);
        // Large samples approach the template term from above.
        assert!(large > TEMPLATE_FWHM_MM);
    }

    #[test]
    fn test_fwhm_at_n_one() {
        let expected = (5.7f64 * 5.7 + 11.6 * 11.6).sqrt();
        assert_relative_eq!(kernel_fwhm_mm(1), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let space = VolumeSpace::isotropic((20, 20, 20), 2.0, [0.0; 3]).unwrap();
        let kernel = GaussianKernel::build(&space, 12).unwrap();
        let total: f64 = kernel.support().map(|(_, w)| w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_center_weight_is_largest() {
        let space = VolumeSpace::isotropic((20, 20, 20), 2.0, [0.0; 3]).unwrap();
        let kernel = GaussianKernel::build(&space, 12).unwrap();
        let center = kernel
            .support()
            .find(|&(off, _)| off == (0, 0, 0))
            .map(|(_, w)| w)
            .unwrap();
        for (_, w) in kernel.support() {
            assert!(w <= center);
        }
    }

    #[test]
    fn test_zero_sample_size_rejected() {
        let space = VolumeSpace::isotropic((10, 10, 10), 2.0, [0.0; 3]).unwrap();
        assert!(GaussianKernel::build(&space, 0).is_err());
    }
}
