//! Input/output helpers.
//!
//! - settings JSON loading (`settings`)
//! - result bundle read/write (`output`)
//! - flat CSV export (`export`)

pub mod export;
pub mod output;
pub mod settings;

pub use export::*;
pub use output::*;
pub use settings::*;
