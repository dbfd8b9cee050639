//! Nested nuisance-parameter fitting.
//!
//! Responsibilities:
//!
//! - bounded minimization backends behind the `Minimizer` trait
//! - the objective evaluator used at every scan point

pub mod evaluator;
pub mod minimizer;

pub use evaluator::*;
pub use minimizer::*;
