//! Packed batch archive format
//!
//! One file per claimed batch, little-endian:
//!
//! ```text
//! i32 version (= 100)
//! repeated until end of file:
//!     i64 job id
//!     i32 body length
//!     u8[body length] body
//! ```
//!
//! Only successfully fetched jobs get a record. There is no record count,
//! trailer, or checksum.

use crate::error::{StorageError, StorageResult};

/// Version tag written at the start of every archive
pub const PACK_VERSION: i32 = 100;

/// Name of the archive unit for a batch whose first job is `first_job_id`
pub fn batch_ref(first_job_id: i64) -> String {
    format!("packed_{}", first_job_id)
}

/// Builds one packed archive in memory
#[derive(Debug, Clone)]
pub struct PackedBatchWriter {
    buf: Vec<u8>,
    records: usize,
}

impl PackedBatchWriter {
    /// Start an archive with the version header
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64 * 1024);
        buf.extend_from_slice(&PACK_VERSION.to_le_bytes());
        Self { buf, records: 0 }
    }

    /// Append one job body
    pub fn push(&mut self, job_id: i64, body: &[u8]) -> StorageResult<()> {
        let len = i32::try_from(body.len()).map_err(|_| {
            StorageError::Malformed(format!(
                "body of job {} is {} bytes, over the i32 length limit",
                job_id,
                body.len()
            ))
        })?;

        self.buf.extend_from_slice(&job_id.to_le_bytes());
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(body);
        self.records += 1;
        Ok(())
    }

    /// Number of records appended
    pub fn records(&self) -> usize {
        self.records
    }

    /// Encoded size so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when only the header has been written
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Finish and return the encoded bytes
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for PackedBatchWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// One decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRecord {
    pub job_id: i64,
    pub body: Vec<u8>,
}

/// Decode a whole packed archive
pub fn decode(bytes: &[u8]) -> StorageResult<Vec<PackedRecord>> {
    let mut cursor = bytes;

    let version = i32::from_le_bytes(take::<4>(&mut cursor, "version header")?);
    if version != PACK_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let mut records = Vec::new();
    while !cursor.is_empty() {
        let job_id = i64::from_le_bytes(take::<8>(&mut cursor, "job id")?);
        let len = i32::from_le_bytes(take::<4>(&mut cursor, "body length")?);
        let len = usize::try_from(len).map_err(|_| {
            StorageError::Malformed(format!("negative body length {} for job {}", len, job_id))
        })?;
        if cursor.len() < len {
            return Err(StorageError::Malformed(format!(
                "body of job {} truncated: expected {} bytes, {} left",
                job_id,
                len,
                cursor.len()
            )));
        }
        let (body, rest) = cursor.split_at(len);
        records.push(PackedRecord {
            job_id,
            body: body.to_vec(),
        });
        cursor = rest;
    }

    Ok(records)
}

fn take<const N: usize>(cursor: &mut &[u8], what: &str) -> StorageResult<[u8; N]> {
    if cursor.len() < N {
        return Err(StorageError::Malformed(format!(
            "truncated {}: need {} bytes, {} left",
            what,
            N,
            cursor.len()
        )));
    }
    let (head, rest) = cursor.split_at(N);
    *cursor = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}
