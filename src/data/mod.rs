//! Data structures for coordinate-based meta-analysis contrasts.

mod sleuth;
mod volume;

pub use sleuth::{FociDataset, Study};
pub use volume::{StatVolume, VolumeSpace};
