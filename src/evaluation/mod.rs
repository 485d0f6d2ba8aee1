//! Post-fit diagnostics for the weighting model.

pub mod balance;

pub use balance::*;
