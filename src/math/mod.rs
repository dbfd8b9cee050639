//! Mathematical utilities: oscillation probabilities and likelihoods.

pub mod llh;
pub mod oscillation;

pub use llh::*;
pub use oscillation::*;
