//! Volumetric file I/O.

mod nifti;

pub use nifti::{read_nifti, write_nifti};
