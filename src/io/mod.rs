//! Input/output helpers.
//!
//! - per-unit weight exports (CSV) (`export`)
//! - run result read/write (JSON) (`result`)

pub mod export;
pub mod result;

pub use export::*;
pub use result::*;
