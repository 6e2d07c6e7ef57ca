//! Permutation-based group-difference (subtraction) estimation.
//!
//! # Algorithm
//!
//! 1. Compute modeled-activation maps for every study of both datasets.
//! 2. Observed statistic: `ale(A) - ale(B)` voxel-wise.
//! 3. Pool the studies, shuffle the pool `n_iterations` times, split each
//!    shuffle into pseudo-groups of the original sizes, and recompute the
//!    ALE difference to build a voxel-wise null.
//! 4. Convert the observed statistic's rank in the null (with the +1
//!    correction) into a signed z value via the standard normal quantile.
//!
//! The generator is an explicit seeded xorshift64; each permutation derives
//! its own state from the seed and its index, so serial and parallel runs
//! produce identical maps.

use crate::data::{FociDataset, StatVolume, VolumeSpace};
use crate::error::{CbmaError, Result};
use crate::estimate::ale::{ale_union, ma_maps};
use ndarray::{Array3, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::info;

/// Configuration of the permutation null.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubtractionParams {
    /// Number of permutations; more iterations give a finer-grained null.
    pub n_iterations: usize,
    /// Seed for the permutation generator.
    pub seed: u64,
    /// Whether to run permutations in parallel.
    pub parallel: bool,
}

impl Default for SubtractionParams {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            seed: 42,
            parallel: true,
        }
    }
}

impl SubtractionParams {
    /// A quick configuration for smoke tests (fewer permutations).
    pub fn quick() -> Self {
        Self {
            n_iterations: 100,
            ..Default::default()
        }
    }

    /// A thorough configuration (more permutations).
    pub fn thorough() -> Self {
        Self {
            n_iterations: 10000,
            ..Default::default()
        }
    }
}

/// Simple deterministic random number generator for permutations.
struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        // xorshift64 has a single absorbing state at zero.
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Fisher-Yates shuffle
    fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        for i in (1..n).rev() {
            let j = (self.next_u64() as usize) % (i + 1);
            slice.swap(i, j);
        }
    }
}

/// Estimate the voxel-wise group-difference z map between two datasets.
///
/// Positive z marks voxels where `a`'s aggregated activation exceeds `b`'s.
/// Voxels whose null distribution is degenerate (observed and every
/// permuted difference identical, e.g. far from any focus) get z = 0.
pub fn estimate_subtraction(
    a: &FociDataset,
    b: &FociDataset,
    space: &VolumeSpace,
    params: &SubtractionParams,
) -> Result<StatVolume> {
    if params.n_iterations < 1 {
        return Err(CbmaError::InvalidParameter(
            "Subtraction requires at least 1 permutation iteration".to_string(),
        ));
    }
    a.check_same_reference(b)?;

    info!(
        a = a.name(),
        b = b.name(),
        n_studies_a = a.n_studies(),
        n_studies_b = b.n_studies(),
        n_iterations = params.n_iterations,
        "Estimating subtraction map"
    );

    let shape = space.shape();
    let n_a = a.n_studies();

    // MA maps are fixed per study; permutations only regroup them.
    let mut pooled = ma_maps(space, a)?;
    pooled.extend(ma_maps(space, b)?);
    let n_total = pooled.len();

    let group_a: Vec<usize> = (0..n_a).collect();
    let group_b: Vec<usize> = (n_a..n_total).collect();
    let observed = {
        let ale_a = ale_union(&pooled, &group_a, shape);
        let ale_b = ale_union(&pooled, &group_b, shape);
        &ale_a - &ale_b
    };

    // Per-voxel counts of permuted differences >= and <= the observed one.
    let run_one = |iteration: usize, ge: &mut Array3<u32>, le: &mut Array3<u32>| {
        let mut rng = SimpleRng::new(params.seed.wrapping_add(iteration as u64));
        let mut indices: Vec<usize> = (0..n_total).collect();
        rng.shuffle(&mut indices);
        let (pseudo_a, pseudo_b) = indices.split_at(n_a);

        let ale_a = ale_union(&pooled, pseudo_a, shape);
        let ale_b = ale_union(&pooled, pseudo_b, shape);
        Zip::from(ge)
            .and(le)
            .and(&ale_a)
            .and(&ale_b)
            .and(&observed)
            .for_each(|ge, le, &pa, &pb, &obs| {
                let null = pa - pb;
                if null >= obs {
                    *ge += 1;
                }
                if null <= obs {
                    *le += 1;
                }
            });
    };

    let (count_ge, count_le) = if params.parallel {
        (0..params.n_iterations)
            .into_par_iter()
            .fold(
                || (Array3::<u32>::zeros(shape), Array3::<u32>::zeros(shape)),
                |(mut ge, mut le), iteration| {
                    run_one(iteration, &mut ge, &mut le);
                    (ge, le)
                },
            )
            .reduce(
                || (Array3::<u32>::zeros(shape), Array3::<u32>::zeros(shape)),
                |(mut ge_a, mut le_a), (ge_b, le_b)| {
                    ge_a += &ge_b;
                    le_a += &le_b;
                    (ge_a, le_a)
                },
            )
    } else {
        let mut ge = Array3::<u32>::zeros(shape);
        let mut le = Array3::<u32>::zeros(shape);
        for iteration in 0..params.n_iterations {
            run_one(iteration, &mut ge, &mut le);
        }
        (ge, le)
    };

    let z = rank_to_z(&count_ge, &count_le, params.n_iterations);
    StatVolume::new(z, space.clone())
}

/// Convert per-voxel null-rank counts into a signed z map.
///
/// Right-tail rank p with the +1 correction when the observed value sits in
/// the upper half of the null, left-tail otherwise; degenerate voxels
/// (every permuted value tied with the observed one) map to z = 0.
fn rank_to_z(count_ge: &Array3<u32>, count_le: &Array3<u32>, n_iterations: usize) -> Array3<f64> {
    let normal = Normal::new(0.0, 1.0).unwrap();
    let n = n_iterations as f64;
    let denom = n + 1.0;
    Zip::from(count_ge)
        .and(count_le)
        .map_collect(|&ge, &le| {
            let all = n_iterations as u32;
            if ge == all && le == all {
                return 0.0;
            }
            if ge <= le {
                let p = (1.0 + ge as f64) / denom;
                normal.inverse_cdf(1.0 - p)
            } else {
                let p = (1.0 + le as f64) / denom;
                -normal.inverse_cdf(1.0 - p)
            }
        })
}
