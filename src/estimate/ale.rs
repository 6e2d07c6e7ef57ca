//! Activation likelihood estimation from modeled-activation maps.

use crate::data::{FociDataset, StatVolume, Study, VolumeSpace};
use crate::error::Result;
use crate::estimate::kernel::GaussianKernel;
use ndarray::{Array3, Zip};
use rayon::prelude::*;
use tracing::warn;

/// Modeled-activation map for one study: the voxel-wise maximum of the
/// study's focus kernels.
pub fn ma_map(space: &VolumeSpace, study: &Study) -> Result<Array3<f64>> {
    let kernel = GaussianKernel::build(space, study.sample_size)?;
    let (nx, ny, nz) = space.shape();
    let mut ma = Array3::zeros((nx, ny, nz));

    let mut n_outside = 0usize;
    for focus in &study.foci {
        let Some(center) = space.mm_to_voxel(*focus) else {
            n_outside += 1;
            continue;
        };
        for ((di, dj, dk), weight) in kernel.support() {
            let i = center.0 as i64 + di;
            let j = center.1 as i64 + dj;
            let k = center.2 as i64 + dk;
            if i < 0 || j < 0 || k < 0 || i >= nx as i64 || j >= ny as i64 || k >= nz as i64 {
                continue;
            }
            let idx = (i as usize, j as usize, k as usize);
            if weight > ma[idx] {
                ma[idx] = weight;
            }
        }
    }
    if n_outside > 0 {
        warn!(
            study = %study.label,
            n_outside,
            "Foci fall outside the volume grid and were skipped"
        );
    }
    Ok(ma)
}

/// Modeled-activation maps for every study of a dataset, in study order.
pub fn ma_maps(space: &VolumeSpace, dataset: &FociDataset) -> Result<Vec<Array3<f64>>> {
    dataset
        .studies()
        .par_iter()
        .map(|study| ma_map(space, study))
        .collect()
}

/// ALE union of a subset of modeled-activation maps:
/// `1 - prod_i (1 - MA_i)` voxel-wise.
pub fn ale_union(maps: &[Array3<f64>], indices: &[usize], shape: (usize, usize, usize)) -> Array3<f64> {
    let mut complement = Array3::from_elem(shape, 1.0);
    for &i in indices {
        Zip::from(&mut complement).and(&maps[i]).for_each(|c, &ma| {
            *c *= 1.0 - ma;
        });
    }
    complement.mapv_inplace(|c| 1.0 - c);
    complement
}

/// ALE map of a whole dataset.
pub fn estimate_ale(dataset: &FociDataset, space: &VolumeSpace) -> Result<StatVolume> {
    let maps = ma_maps(space, dataset)?;
    let indices: Vec<usize> = (0..maps.len()).collect();
    let ale = ale_union(&maps, &indices, space.shape());
    StatVolume::new(ale, space.clone())
}
