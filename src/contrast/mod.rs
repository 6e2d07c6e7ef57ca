//! Contrast pipeline composition and execution.

mod runner;

pub use runner::{
    run_subtraction, ContrastName, SpaceSpec, SubtractionConfig, SubtractionOutcome,
};
