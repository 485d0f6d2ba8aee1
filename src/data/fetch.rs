//! Download the public NHEFS extract.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::info;

use crate::data::nhefs::validate_header_line;
use crate::error::AppError;

/// Public NHEFS CSV distributed with Hernán & Robins, *Causal Inference: What If*.
pub const DEFAULT_NHEFS_URL: &str = "https://cdn1.sph.harvard.edu/wp-content/uploads/sites/1268/1268/20/nhefs.csv";

const TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch the NHEFS CSV from `url` and write it to `out_path`.
///
/// The body is validated as an NHEFS table before anything is written, so a
/// failed download never clobbers an existing file. Returns the bytes written.
/// Network and validation failures are IO errors (exit code 2).
pub fn fetch_nhefs(url: &str, out_path: &Path) -> Result<u64, AppError> {
    let client = Client::builder()
        .timeout(TIMEOUT)
        .build()
        .map_err(|e| AppError::input(format!("Failed to build HTTP client: {e}")))?;

    info!(url, "downloading NHEFS");
    let resp = client
        .get(url)
        .send()
        .map_err(|e| AppError::input(format!("NHEFS download failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(AppError::input(format!(
            "NHEFS download failed with status {}.",
            resp.status()
        )));
    }

    let body = resp
        .bytes()
        .map_err(|e| AppError::input(format!("Failed to read NHEFS response body: {e}")))?;

    validate_body(&body)?;
    write_atomically(out_path, &body)?;

    info!(path = %out_path.display(), bytes = body.len(), "NHEFS saved");
    Ok(body.len() as u64)
}

fn validate_body(body: &[u8]) -> Result<(), AppError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::input("Downloaded NHEFS file is not valid UTF-8."))?;
    let header = text
        .lines()
        .next()
        .ok_or_else(|| AppError::input("Downloaded NHEFS file is empty."))?;
    validate_header_line(header)
        .map_err(|e| AppError::input(format!("Downloaded file does not look like NHEFS: {e}")))
}

fn write_atomically(out_path: &Path, body: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)
            .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", parent.display())))?;
    }

    let tmp = out_path.with_extension("csv.part");
    let mut file = File::create(&tmp)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", tmp.display())))?;
    file.write_all(body)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", tmp.display())))?;
    file.sync_all()
        .map_err(|e| AppError::input(format!("Failed to flush '{}': {e}", tmp.display())))?;
    drop(file);

    std::fs::rename(&tmp, out_path)
        .map_err(|e| AppError::input(format!("Failed to move download into '{}': {e}", out_path.display())))
}
