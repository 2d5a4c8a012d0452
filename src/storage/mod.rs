//! Archive storage across multiple volumes
//!
//! Packed batches are spread over a fixed, ordered list of volumes. Each
//! volume keeps a configurable margin of free space that is never allocated
//! against; once a volume cannot take a write it is left behind for good.
//!
//! ```text
//!   reserve(size)
//!        │
//!        ▼
//!  ┌──────────┐  full  ┌──────────┐  full  ┌──────────┐
//!  │ Volume 1 │ ─────► │ Volume 2 │ ─────► │ Volume N │ ─────► no space
//!  └────┬─────┘        └──────────┘        └──────────┘
//!       │ permit
//!       ▼
//!  <root>/<0..199>/packed_<first job id>
//! ```

pub mod allocator;
pub mod volume;

pub use allocator::{
    locate_in_volume, locate_partial_in_volume, VolumeAllocator, WritePermit, DISTRIBUTION,
};
pub use volume::{parse_size, FsSpaceProbe, Margin, SpaceProbe, Volume};
