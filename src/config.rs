//! Environment-backed defaults.
//!
//! A `.env` file in the working directory (or real environment variables) can
//! set:
//!
//! - `IPW_NHEFS_CSV`: where the NHEFS CSV lives / is downloaded to
//! - `IPW_NHEFS_URL`: where `ipw fetch` downloads it from
//!
//! Explicit CLI flags always win over these.

use std::path::PathBuf;

use crate::data::DEFAULT_NHEFS_URL;

pub const ENV_NHEFS_CSV: &str = "IPW_NHEFS_CSV";
pub const ENV_NHEFS_URL: &str = "IPW_NHEFS_URL";

const DEFAULT_NHEFS_CSV: &str = "data/nhefs.csv";

/// Load `.env` if present. Missing files are fine.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Resolve the NHEFS CSV path: flag, then `IPW_NHEFS_CSV`, then `data/nhefs.csv`.
pub fn resolve_data_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env_non_empty(ENV_NHEFS_CSV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_NHEFS_CSV))
}

/// Resolve the download URL: flag, then `IPW_NHEFS_URL`, then the public extract.
pub fn resolve_url(flag: Option<String>) -> String {
    flag.or_else(|| env_non_empty(ENV_NHEFS_URL))
        .unwrap_or_else(|| DEFAULT_NHEFS_URL.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_take_precedence() {
        let p = resolve_data_path(Some(PathBuf::from("x.csv")));
        assert_eq!(p, PathBuf::from("x.csv"));
        assert_eq!(resolve_url(Some("http://example.invalid/a.csv".into())), "http://example.invalid/a.csv");
    }
}
