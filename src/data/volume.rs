//! Statistical volumes and the voxel grids they live on.

use crate::error::{CbmaError, Result};
use nalgebra::{Matrix3, Matrix4, Vector4};
use ndarray::Array3;

/// Tolerance used when comparing affines for equality.
const AFFINE_TOL: f64 = 1e-6;

/// A voxel grid: array dimensions plus the affine mapping indices to
/// millimeter coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpace {
    shape: (usize, usize, usize),
    affine: Matrix4<f64>,
}

impl VolumeSpace {
    /// Create a space from a shape and a 4x4 voxel-to-mm affine.
    pub fn new(shape: (usize, usize, usize), affine: Matrix4<f64>) -> Result<Self> {
        if shape.0 == 0 || shape.1 == 0 || shape.2 == 0 {
            return Err(CbmaError::InvalidParameter(format!(
                "Volume shape must be non-zero in every dimension, got {:?}",
                shape
            )));
        }
        let det = affine.fixed_view::<3, 3>(0, 0).clone_owned().determinant();
        if det.abs() < f64::EPSILON {
            return Err(CbmaError::InvalidParameter(
                "Affine has a singular spatial block".to_string(),
            ));
        }
        Ok(Self { shape, affine })
    }

    /// The standard MNI152 grid at 2 mm isotropic resolution (91x109x91).
    pub fn mni152_2mm() -> Self {
        let affine = Matrix4::new(
            -2.0, 0.0, 0.0, 90.0, //
            0.0, 2.0, 0.0, -126.0, //
            0.0, 0.0, 2.0, -72.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        Self {
            shape: (91, 109, 91),
            affine,
        }
    }

    /// An axis-aligned isotropic grid with the given voxel size and the mm
    /// coordinate of voxel (0, 0, 0).
    pub fn isotropic(
        shape: (usize, usize, usize),
        voxel_size_mm: f64,
        origin_mm: [f64; 3],
    ) -> Result<Self> {
        if voxel_size_mm <= 0.0 {
            return Err(CbmaError::InvalidParameter(format!(
                "Voxel size must be positive, got {}",
                voxel_size_mm
            )));
        }
        let mut affine = Matrix4::identity();
        affine[(0, 0)] = voxel_size_mm;
        affine[(1, 1)] = voxel_size_mm;
        affine[(2, 2)] = voxel_size_mm;
        affine[(0, 3)] = origin_mm[0];
        affine[(1, 3)] = origin_mm[1];
        affine[(2, 3)] = origin_mm[2];
        Self::new(shape, affine)
    }

    /// Grid dimensions.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// Total voxel count.
    pub fn n_voxels(&self) -> usize {
        self.shape.0 * self.shape.1 * self.shape.2
    }

    /// The voxel-to-mm affine.
    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    /// Physical volume of one voxel in mm^3 (|det| of the spatial block).
    pub fn voxel_volume_mm3(&self) -> f64 {
        let block: Matrix3<f64> = self.affine.fixed_view::<3, 3>(0, 0).clone_owned();
        block.determinant().abs()
    }

    /// Map a voxel index to its mm coordinate.
    pub fn voxel_to_mm(&self, idx: (usize, usize, usize)) -> [f64; 3] {
        let v = Vector4::new(idx.0 as f64, idx.1 as f64, idx.2 as f64, 1.0);
        let mm = self.affine * v;
        [mm[0], mm[1], mm[2]]
    }

    /// Map a mm coordinate to the nearest voxel index, or `None` when it
    /// falls outside the grid.
    pub fn mm_to_voxel(&self, mm: [f64; 3]) -> Option<(usize, usize, usize)> {
        let inv = self.affine.try_inverse()?;
        let v = inv * Vector4::new(mm[0], mm[1], mm[2], 1.0);
        let (i, j, k) = (v[0].round(), v[1].round(), v[2].round());
        if i < 0.0 || j < 0.0 || k < 0.0 {
            return None;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= self.shape.0 || j >= self.shape.1 || k >= self.shape.2 {
            return None;
        }
        Some((i, j, k))
    }

    /// Check whether another space has the same shape and affine.
    pub fn matches(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self
                .affine
                .iter()
                .zip(other.affine.iter())
                .all(|(a, b)| (a - b).abs() <= AFFINE_TOL)
    }
}

/// A 3-D map of voxel-wise statistic values in a known space.
///
/// Derived maps (thresholded, directional, conjunction) are constructed once
/// and treated as immutable thereafter.
#[derive(Debug, Clone)]
pub struct StatVolume {
    data: Array3<f64>,
    space: VolumeSpace,
}

impl StatVolume {
    /// Create a volume, checking the data against the space's shape.
    pub fn new(data: Array3<f64>, space: VolumeSpace) -> Result<Self> {
        let dim = data.dim();
        if dim != space.shape() {
            return Err(CbmaError::ShapeMismatch {
                expected: space.shape(),
                actual: dim,
            });
        }
        Ok(Self { data, space })
    }

    /// An all-zero volume in the given space.
    pub fn zeros(space: VolumeSpace) -> Self {
        let data = Array3::zeros(space.shape());
        Self { data, space }
    }

    /// Voxel data.
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// The space this volume lives in.
    pub fn space(&self) -> &VolumeSpace {
        &self.space
    }

    /// Grid dimensions.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of voxels with a non-zero value.
    pub fn n_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    /// True when every voxel is exactly zero.
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Fail unless `other` shares this volume's shape and affine.
    pub fn check_same_space(&self, other: &Self) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(CbmaError::ShapeMismatch {
                expected: self.shape(),
                actual: other.shape(),
            });
        }
        if !self.space.matches(other.space()) {
            return Err(CbmaError::AffineMismatch(
                "Volumes share a shape but not an affine".to_string(),
            ));
        }
        Ok(())
    }

    /// Derive a new volume by mapping every voxel value.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            data: self.data.mapv(|v| f(v)),
            space: self.space.clone(),
        }
    }
}
