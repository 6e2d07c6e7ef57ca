//! Connected-component labeling for cluster-extent filtering.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Neighborhood convention used when grouping supra-threshold voxels into
/// clusters.
///
/// `Faces` (6-connectivity) is the default, matching the default labeling
/// convention of the common neuroimaging thresholding routines. `Edges` and
/// `Corners` give the 18- and 26-neighbor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// 6 neighbors sharing a face.
    #[default]
    Faces,
    /// 18 neighbors sharing a face or an edge.
    Edges,
    /// 26 neighbors sharing a face, edge, or corner.
    Corners,
}

impl Connectivity {
    /// Number of neighbors under this convention.
    pub fn n_neighbors(self) -> usize {
        match self {
            Self::Faces => 6,
            Self::Edges => 18,
            Self::Corners => 26,
        }
    }

    /// Index offsets of the neighborhood.
    fn offsets(self) -> Vec<(i64, i64, i64)> {
        let max_l1 = match self {
            Self::Faces => 1,
            Self::Edges => 2,
            Self::Corners => 3,
        };
        let mut offsets = Vec::with_capacity(self.n_neighbors());
        for di in -1i64..=1 {
            for dj in -1i64..=1 {
                for dk in -1i64..=1 {
                    let l1 = di.abs() + dj.abs() + dk.abs();
                    if l1 >= 1 && l1 <= max_l1 {
                        offsets.push((di, dj, dk));
                    }
                }
            }
        }
        offsets
    }
}

/// Labeled connected components of a binary mask.
///
/// Voxel labels are 1-based; 0 marks background.
#[derive(Debug, Clone)]
pub struct ClusterLabels {
    labels: Array3<u32>,
    sizes: Vec<usize>,
}

impl ClusterLabels {
    /// Label array, 0 for background.
    pub fn labels(&self) -> &Array3<u32> {
        &self.labels
    }

    /// Number of clusters found.
    pub fn n_clusters(&self) -> usize {
        self.sizes.len()
    }

    /// Voxel count of a 1-based cluster label.
    pub fn size_of(&self, label: u32) -> usize {
        self.sizes[(label - 1) as usize]
    }

    /// Voxel counts of all clusters, indexed by label - 1.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }
}

/// Label the connected components of `mask` under the given connectivity.
///
/// Breadth-first flood fill; labels are assigned in scan order, so the
/// output is deterministic for a given mask.
pub fn label_clusters(mask: &Array3<bool>, connectivity: Connectivity) -> ClusterLabels {
    let (nx, ny, nz) = mask.dim();
    let offsets = connectivity.offsets();
    let mut labels = Array3::<u32>::zeros((nx, ny, nz));
    let mut sizes = Vec::new();
    let mut queue: VecDeque<(usize, usize, usize)> = VecDeque::new();

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                if !mask[(x, y, z)] || labels[(x, y, z)] != 0 {
                    continue;
                }
                let label = sizes.len() as u32 + 1;
                let mut size = 0usize;
                labels[(x, y, z)] = label;
                queue.push_back((x, y, z));

                while let Some((cx, cy, cz)) = queue.pop_front() {
                    size += 1;
                    for &(di, dj, dk) in &offsets {
                        let nx_i = cx as i64 + di;
                        let ny_i = cy as i64 + dj;
                        let nz_i = cz as i64 + dk;
                        if nx_i < 0
                            || ny_i < 0
                            || nz_i < 0
                            || nx_i >= nx as i64
                            || ny_i >= ny as i64
                            || nz_i >= nz as i64
                        {
                            continue;
                        }
                        let n = (nx_i as usize, ny_i as usize, nz_i as usize);
                        if mask[n] && labels[n] == 0 {
                            labels[n] = label;
                            queue.push_back(n);
                        }
                    }
                }
                sizes.push(size);
            }
        }
    }

    ClusterLabels { labels, sizes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(points: &[(usize, usize, usize)]) -> Array3<bool> {
        let mut mask = Array3::from_elem((5, 5, 5), false);
        for &p in points {
            mask[p] = true;
        }
        mask
    }

    #[test]
    fn test_face_neighbors_form_one_cluster() {
        let mask = mask_with(&[(1, 1, 1), (2, 1, 1), (2, 2, 1)]);
        let labeled = label_clusters(&mask, Connectivity::Faces);
        assert_eq!(labeled.n_clusters(), 1);
        assert_eq!(labeled.size_of(1), 3);
    }

    #[test]
    fn test_corner_diagonal_split_by_connectivity() {
        // (1,1,1) and (2,2,2) touch only at a corner.
        let mask = mask_with(&[(1, 1, 1), (2, 2, 2)]);

        let faces = label_clusters(&mask, Connectivity::Faces);
        assert_eq!(faces.n_clusters(), 2);

        let corners = label_clusters(&mask, Connectivity::Corners);
        assert_eq!(corners.n_clusters(), 1);
        assert_eq!(corners.size_of(1), 2);
    }

    #[test]
    fn test_edge_diagonal_connectivity() {
        // (1,1,1) and (2,2,1) share an edge.
        let mask = mask_with(&[(1, 1, 1), (2, 2, 1)]);

        assert_eq!(label_clusters(&mask, Connectivity::Faces).n_clusters(), 2);
        assert_eq!(label_clusters(&mask, Connectivity::Edges).n_clusters(), 1);
    }

    #[test]
    fn test_neighbor_counts() {
        assert_eq!(Connectivity::Faces.offsets().len(), 6);
        assert_eq!(Connectivity::Edges.offsets().len(), 18);
        assert_eq!(Connectivity::Corners.offsets().len(), 26);
    }

    #[test]
    fn test_empty_mask() {
        let mask = Array3::from_elem((3, 3, 3), false);
        let labeled = label_clusters(&mask, Connectivity::Faces);
        assert_eq!(labeled.n_clusters(), 0);
    }

    #[test]
    fn test_labels_are_scan_order_deterministic() {
        let mask = mask_with(&[(0, 0, 0), (4, 4, 4)]);
        let labeled = label_clusters(&mask, Connectivity::Faces);
        assert_eq!(labeled.labels()[(0, 0, 0)], 1);
        assert_eq!(labeled.labels()[(4, 4, 4)], 2);
    }
}
