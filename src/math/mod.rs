//! Mathematical utilities: logistic link functions and linear solves.

pub mod linalg;
pub mod link;

pub use linalg::*;
pub use link::*;
