//! Seed list loading
//!
//! A seed file lists one group uid per line. Reading stops at the first empty
//! line, so anything after a blank separator is ignored.

use crate::error::ConfigError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read group uids from a seed file
pub fn load_seeds(path: &Path) -> Result<Vec<String>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSeedFile {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    read_seeds(BufReader::new(file)).map_err(|e| invalid(e.to_string()))
}

/// Read group uids from any line source
pub fn read_seeds<R: BufRead>(reader: R) -> std::io::Result<Vec<String>> {
    let mut uids = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let uid = line.trim();
        if uid.is_empty() {
            break;
        }
        uids.push(uid.to_string());
    }
    Ok(uids)
}
