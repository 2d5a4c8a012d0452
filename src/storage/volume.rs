//! Storage volumes and free-space probing

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// One archive volume: a directory on some filesystem plus the headroom that
/// must always stay free on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Directory archives are written under
    pub root: PathBuf,

    /// Bytes that must remain free on the filesystem
    pub margin: u64,
}

impl Volume {
    /// Create a volume with a fixed margin in bytes
    pub fn new(root: impl Into<PathBuf>, margin: u64) -> Self {
        Self {
            root: root.into(),
            margin,
        }
    }
}

/// Headroom to keep free on a volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Margin {
    /// Absolute byte count
    Bytes(u64),

    /// Percentage of the filesystem's total size
    Percent(f64),
}

impl Margin {
    /// Resolve to a byte count for the filesystem holding `root`
    pub fn resolve(&self, root: &Path) -> io::Result<u64> {
        match *self {
            Margin::Bytes(bytes) => Ok(bytes),
            Margin::Percent(pct) => {
                let total = fs2::total_space(root)?;
                Ok((total as f64 * pct / 100.0) as u64)
            }
        }
    }

    /// Parse `1GB`, `500MB`, `4096`, or `1%`
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct: f64 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage '{}'", s))?;
            if !(0.0..=100.0).contains(&pct) {
                return Err(format!("percentage out of range: {}", s));
            }
            return Ok(Margin::Percent(pct));
        }
        parse_size(s).map(Margin::Bytes)
    }
}

impl fmt::Display for Margin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Margin::Bytes(b) => write!(f, "{}", humansize::format_size(*b, humansize::BINARY)),
            Margin::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// Parse a human-readable size ("2TB", "500MB", "1.5GB", "4096")
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("TB") {
        (n, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024u64 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024u64)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1u64)
    } else {
        (s.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}'", s))?;
    if num < 0.0 {
        return Err(format!("negative size '{}'", s));
    }

    Ok((num * multiplier as f64) as u64)
}

/// Source of free-space figures for volume roots
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to this process on the filesystem holding `root`
    fn available_space(&self, root: &Path) -> io::Result<u64>;
}

/// Queries the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, root: &Path) -> io::Result<u64> {
        fs2::available_space(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("500mb").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("1.5GB").unwrap(), 1536 * 1024 * 1024);
        assert_eq!(parse_size("2TB").unwrap(), 2 * 1024 * 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("-1GB").is_err());
    }

    #[test]
    fn test_parse_margin() {
        assert_eq!(Margin::parse("1GB").unwrap(), Margin::Bytes(1024 * 1024 * 1024));
        assert_eq!(Margin::parse("1%").unwrap(), Margin::Percent(1.0));
        assert!(Margin::parse("150%").is_err());
        assert!(Margin::parse("x%").is_err());
    }

    #[test]
    fn test_resolve_bytes_margin() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Margin::Bytes(42).resolve(dir.path()).unwrap(), 42);
    }

    #[test]
    fn test_resolve_percent_margin() {
        let dir = tempfile::tempdir().unwrap();
        let total = fs2::total_space(dir.path()).unwrap();
        let margin = Margin::Percent(1.0).resolve(dir.path()).unwrap();
        assert_eq!(margin, (total as f64 / 100.0) as u64);
    }

    #[test]
    fn test_fs_probe_reports_space() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsSpaceProbe.available_space(dir.path()).is_ok());
    }
}
