//! Packed batch archives
//!
//! Each orchestrator iteration produces exactly one archive file holding the
//! bodies of every successfully fetched job in the batch.

pub mod pack;

pub use pack::{batch_ref, decode, PackedBatchWriter, PackedRecord, PACK_VERSION};
