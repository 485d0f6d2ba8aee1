//! Data sources: the NHEFS loader, its downloader, and a synthetic generator.

pub mod fetch;
pub mod nhefs;
pub mod simulate;

pub use fetch::{DEFAULT_NHEFS_URL, fetch_nhefs};
pub use nhefs::{LoadedNhefs, NhefsOptions, RowError, load_nhefs, read_nhefs};
pub use simulate::{SimulatedData, SimulationConfig, simulate_nhefs, write_raw_csv};
