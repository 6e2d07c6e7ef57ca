//! Directional split of signed contrast maps.

use crate::data::StatVolume;

/// The two directional halves of a signed contrast map.
#[derive(Debug, Clone)]
pub struct DirectionalMaps {
    /// Voxels where the first group exceeds the second, kept as-is.
    pub a_gt_b: StatVolume,
    /// Voxels where the second group exceeds the first, sign flipped to
    /// positive.
    pub b_gt_a: StatVolume,
}

/// Split a signed map into its two directions.
///
/// The halves have disjoint non-zero supports and reconstruct the input
/// exactly: `a_gt_b - b_gt_a == map` voxel-wise.
pub fn split_directional(map: &StatVolume) -> DirectionalMaps {
    let a_gt_b = map.map(|v| if v > 0.0 { v } else { 0.0 });
    let b_gt_a = map.map(|v| if v < 0.0 { -v } else { 0.0 });
    DirectionalMaps { a_gt_b, b_gt_a }
}
