//! Attribute carriers handed to the host driver.

use crate::repr::{BLOCK_SIZE, DIR_ENTRY_SIZE, Inode, NAME_LEN, TimeSpec};

/// `S_IFDIR | 0755`.
pub const MODE_DIR: u32 = 0o040_755;
/// `S_IFREG | 0755`.
pub const MODE_FILE: u32 = 0o100_755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// What `getattr` reports for one inode.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub kind: NodeKind,
    /// `S_IFDIR | 0755` for directories, `S_IFREG | 0755` for files.
    pub mode: u32,
    pub nlink: u64,
    /// Bytes; a directory's entry count scaled to entry size.
    pub size: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Metadata {
    pub(crate) fn from_inode(ino: &Inode) -> Self {
        let (kind, mode, size) = if ino.is_dir() {
            (NodeKind::Dir, MODE_DIR, ino.size * DIR_ENTRY_SIZE as u64)
        } else {
            (NodeKind::File, MODE_FILE, ino.size)
        };
        Metadata {
            kind,
            mode,
            nlink: ino.nlinks,
            size,
            atime: ino.atime,
            mtime: ino.mtime,
            ctime: ino.ctime,
        }
    }
}

/// What `statfs` reports for the whole filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FsStat {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub name_max: u64,
}

impl FsStat {
    pub(crate) fn new(blocks: u64, free: u64) -> Self {
        FsStat {
            block_size: BLOCK_SIZE as u64,
            blocks,
            blocks_free: free,
            blocks_avail: free,
            name_max: NAME_LEN as u64 - 1,
        }
    }
}
