//! Multi-volume write allocator
//!
//! The allocator walks an ordered list of volumes with a cursor that only
//! moves forward. A volume is used while
//! `available - pending - size > margin`; the first time a request does not
//! fit, the cursor moves to the next volume and the old one is never
//! considered again for the lifetime of the allocator. That keeps the number
//! of free-space queries against near-full volumes at one.
//!
//! `pending` counts bytes reserved by writes that have not finished yet. It is
//! tracked for the cursor volume only and reset to zero whenever the cursor
//! moves. A [`WritePermit`] returns its bytes on drop, but only if the cursor
//! still points at the permit's volume.

use crate::archive;
use crate::error::{StorageError, StorageResult};
use crate::storage::volume::{SpaceProbe, Volume};
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Number of subdirectories per volume files are spread across
pub const DISTRIBUTION: usize = 200;

#[derive(Debug, Default)]
struct AllocState {
    cursor: usize,
    pending: u64,
}

/// Hands out space on the first volume that can still take a write
pub struct VolumeAllocator {
    volumes: Vec<Volume>,
    probe: Box<dyn SpaceProbe>,
    state: Mutex<AllocState>,
}

/// Reservation of `size` bytes on one volume
///
/// Releases its reservation when dropped.
pub struct WritePermit<'a> {
    allocator: &'a VolumeAllocator,
    volume: usize,
    size: u64,
}

impl WritePermit<'_> {
    /// Root directory of the reserved volume
    pub fn root(&self) -> &Path {
        &self.allocator.volumes[self.volume].root
    }

    /// Bytes reserved
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        self.allocator.release(self.volume, self.size);
    }
}

impl VolumeAllocator {
    /// Create an allocator and prepare every volume's directory layout
    pub fn new(volumes: Vec<Volume>, probe: Box<dyn SpaceProbe>) -> StorageResult<Self> {
        for volume in &volumes {
            prepare_volume(&volume.root)?;
        }

        Ok(Self {
            volumes,
            probe,
            state: Mutex::new(AllocState::default()),
        })
    }

    /// Configured volumes, in allocation order
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Reserve `size` bytes on the current volume, advancing past volumes
    /// that cannot take it
    ///
    /// Returns `None` when no remaining volume has room. Free space is
    /// queried outside the lock.
    pub fn reserve(&self, size: u64) -> Option<WritePermit<'_>> {
        loop {
            let index = {
                let state = self.lock();
                if state.cursor >= self.volumes.len() {
                    return None;
                }
                state.cursor
            };

            let volume = &self.volumes[index];
            let available = match self.probe.available_space(&volume.root) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(root = %volume.root.display(), error = %e, "Failed to query free space");
                    return None;
                }
            };

            let mut state = self.lock();
            if state.cursor != index {
                // Someone else advanced while we were probing
                continue;
            }

            let headroom =
                available as i128 - state.pending as i128 - size as i128 - volume.margin as i128;
            if headroom > 0 {
                state.pending += size;
                return Some(WritePermit {
                    allocator: self,
                    volume: index,
                    size,
                });
            }

            state.cursor += 1;
            state.pending = 0;
            if let Some(next) = self.volumes.get(state.cursor) {
                info!(
                    full = %volume.root.display(),
                    next = %next.root.display(),
                    "Volume reached its margin, moving to next volume"
                );
            } else {
                warn!(full = %volume.root.display(), "Last volume reached its margin");
            }
        }
    }

    /// Write `bytes` as `key` on the permit's volume
    ///
    /// The file lands in one of [`DISTRIBUTION`] subdirectories chosen at
    /// random; an existing file of the same name is never overwritten, the
    /// next bucket is tried instead. The permit is released whether or not
    /// the write succeeds. Returns `false` on any I/O failure.
    pub fn write(&self, permit: WritePermit<'_>, key: &str, bytes: &[u8]) -> bool {
        let start = rand::thread_rng().gen_range(0..DISTRIBUTION);
        let root = permit.root().to_path_buf();

        let result = write_new(&root, start, key, bytes);
        drop(permit);

        match result {
            Ok(path) => {
                debug!(path = %path.display(), bytes = bytes.len(), "Saved archive");
                true
            }
            Err(e) => {
                error!(root = %root.display(), key, error = %e, "Failed to write archive");
                false
            }
        }
    }

    /// Reserve space and write `bytes` as `key`
    ///
    /// Returns `false` when no volume has room or the write fails.
    pub fn save(&self, key: &str, bytes: &[u8]) -> bool {
        match self.reserve(bytes.len() as u64) {
            Some(permit) => self.write(permit, key, bytes),
            None => {
                error!(key, bytes = bytes.len(), "No volume has room for archive");
                false
            }
        }
    }

    /// Find every copy of `key` across all volumes
    pub fn locate(&self, key: &str) -> Vec<PathBuf> {
        self.volumes
            .iter()
            .flat_map(|v| locate_in_volume(&v.root, key))
            .collect()
    }

    fn release(&self, volume: usize, size: u64) {
        let mut state = self.lock();
        if state.cursor == volume {
            state.pending = state.pending.saturating_sub(size);
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocState> {
        // The state is two integers; a panic cannot leave it half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn pending(&self) -> u64 {
        self.lock().pending
    }
}

/// Create `root` and its distribution subdirectories
fn prepare_volume(root: &Path) -> StorageResult<()> {
    let setup_err = |source| StorageError::VolumeSetup {
        root: root.to_path_buf(),
        source,
    };

    fs::create_dir_all(root).map_err(setup_err)?;
    for i in 0..DISTRIBUTION {
        fs::create_dir_all(root.join(i.to_string())).map_err(setup_err)?;
    }
    Ok(())
}

/// Create `key` in the first bucket, from `start` on, that does not hold it yet
fn write_new(root: &Path, start: usize, key: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    for offset in 0..DISTRIBUTION {
        let bucket = (start + offset) % DISTRIBUTION;
        let path = root.join(bucket.to_string()).join(key);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                fill_or_remove(file, &path, bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("'{}' already exists in every bucket", key),
    ))
}

/// Write `bytes` into the freshly created `file` at `path`
///
/// A failed write removes that file, so no partial copy is left behind
/// under a name another batch may share.
fn fill_or_remove<W: Write>(mut file: W, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let result = file.write_all(bytes).and_then(|()| file.flush());
    if let Err(e) = result {
        drop(file);
        if let Err(rm) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %rm, "Failed to remove partial archive");
        }
        return Err(e);
    }
    Ok(())
}

/// Copies of `key` under `root` that do not decode as a packed archive
///
/// Several files may share one name; only the unreadable ones are returned,
/// never a complete archive other jobs point to.
pub fn locate_partial_in_volume(root: &Path, key: &str) -> Vec<PathBuf> {
    locate_in_volume(root, key)
        .into_iter()
        .filter(|path| match fs::read(path) {
            Ok(bytes) => archive::decode(&bytes).is_err(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read archive copy, leaving it");
                false
            }
        })
        .collect()
}

/// Paths of `key` in any distribution subdirectory of `root`
pub fn locate_in_volume(root: &Path, key: &str) -> Vec<PathBuf> {
    (0..DISTRIBUTION)
        .map(|i| root.join(i.to_string()).join(key))
        .filter(|p| p.is_file())
        .collect()
}
