//! In-memory POSIX-like filesystem over a single relocatable region.
//!
//! Layers, leaf to root:
//!
//! * `region`: handle over the host-provided bytes, the one-time bootstrap
//!   and the offset-to-memory conversion every other layer goes through.
//! * `alloc`: block allocator over a sorted, coalesced free list.
//! * `node`: inode table, the file position cursor, the block-list engine
//!   and the directory engine.
//! * `path`: absolute path resolution.
//! * `ops`: the POSIX-facing operation surface consumed by the host
//!   driver, with errno translation in `error`.
//!
//! The host serializes calls and owns the region memory; no process
//! address is retained across calls, so the region may be remapped at a
//! different base between any two operations.

pub(crate) use regionfs_types as repr;

mod alloc;
mod check;
mod error;
mod node;
mod ops;
mod path;
mod region;
mod stat;

pub use error::{Errno, FsError};
pub use region::Filesystem;
pub use regionfs_types::{BLOCK_SIZE, NAME_LEN, TimeSpec};
pub use stat::{FsStat, MODE_DIR, MODE_FILE, Metadata, NodeKind};
