//! Post-processing of thresholded maps: directional splits and conjunctions.

mod conjunction;
mod direction;

pub use conjunction::conjunction;
pub use direction::{split_directional, DirectionalMaps};
