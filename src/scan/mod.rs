//! The grid scan: step expansion, point enumeration, the driver and its results.

pub mod driver;
pub mod grid;
pub mod result;
pub mod steps;

pub use driver::*;
pub use grid::*;
pub use result::*;
pub use steps::*;
