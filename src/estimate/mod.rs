//! ALE estimation and permutation-based group differences.

mod ale;
mod kernel;
mod subtraction;

pub use ale::{ale_union, estimate_ale, ma_map, ma_maps};
pub use kernel::{kernel_fwhm_mm, GaussianKernel, SUBJECT_FWHM_MM, TEMPLATE_FWHM_MM};
pub use subtraction::{estimate_subtraction, SubtractionParams};
