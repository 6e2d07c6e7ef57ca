//! Conjunction of independently thresholded maps.

use crate::data::StatVolume;
use crate::error::Result;
use ndarray::Zip;

/// Voxel-wise conjunction of two maps.
///
/// A voxel survives only where both inputs are non-zero and agree in sign;
/// the output takes the algebraic minimum of the two values (not the
/// minimum magnitude). Value-type agnostic: works on z maps and on raw
/// effect-size maps alike.
///
/// Fails before any arithmetic when the maps do not share a shape and
/// affine.
pub fn conjunction(x: &StatVolume, y: &StatVolume) -> Result<StatVolume> {
    x.check_same_space(y)?;

    let data = Zip::from(x.data())
        .and(y.data())
        .map_collect(|&a, &b| if a * b > 0.0 { a.min(b) } else { 0.0 });

    StatVolume::new(data, x.space().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VolumeSpace;
    use crate::error::CbmaError;
    use ndarray::Array3;

    fn volume(values: &[((usize, usize, usize), f64)]) -> StatVolume {
        let space = VolumeSpace::isotropic((4, 4, 4), 2.0, [0.0; 3]).unwrap();
        let mut data = Array3::zeros((4, 4, 4));
        for &(idx, v) in values {
            data[idx] = v;
        }
        StatVolume::new(data, space).unwrap()
    }

    #[test]
    fn test_agreeing_signs_take_algebraic_minimum() {
        let x = volume(&[((0, 0, 0), 4.0), ((1, 1, 1), -3.0)]);
        let y = volume(&[((0, 0, 0), 2.5), ((1, 1, 1), -5.0)]);
        let c = conjunction(&x, &y).unwrap();
        assert_eq!(c.data()[(0, 0, 0)], 2.5);
        // Algebraic minimum of two negatives is the more negative one.
        assert_eq!(c.data()[(1, 1, 1)], -5.0);
    }

    #[test]
    fn test_opposite_signs_zeroed() {
        let x = volume(&[((2, 2, 2), 4.0)]);
        let y = volume(&[((2, 2, 2), -4.0)]);
        let c = conjunction(&x, &y).unwrap();
        assert_eq!(c.data()[(2, 2, 2)], 0.0);
    }

    #[test]
    fn test_zero_propagation() {
        let x = volume(&[((1, 0, 0), 3.0)]);
        let y = volume(&[]);
        let c = conjunction(&x, &y).unwrap();
        assert!(c.is_all_zero());
    }

    #[test]
    fn test_symmetry() {
        let x = volume(&[((0, 0, 0), 4.0), ((1, 1, 1), -3.0), ((2, 0, 1), 1.5)]);
        let y = volume(&[((0, 0, 0), 2.5), ((1, 1, 1), -5.0), ((3, 3, 3), 2.0)]);
        let xy = conjunction(&x, &y).unwrap();
        let yx = conjunction(&y, &x).unwrap();
        assert_eq!(xy.data(), yx.data());
    }

    #[test]
    fn test_shape_mismatch_fails_before_arithmetic() {
        let x = volume(&[]);
        let other_space = VolumeSpace::isotropic((5, 4, 4), 2.0, [0.0; 3]).unwrap();
        let y = StatVolume::zeros(other_space);
        assert!(matches!(
            conjunction(&x, &y).unwrap_err(),
            CbmaError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_affine_mismatch_fails() {
        let x = volume(&[]);
        let shifted = VolumeSpace::isotropic((4, 4, 4), 2.0, [10.0, 0.0, 0.0]).unwrap();
        let y = StatVolume::zeros(shifted);
        assert!(matches!(
            conjunction(&x, &y).unwrap_err(),
            CbmaError::AffineMismatch(_)
        ));
    }
}
