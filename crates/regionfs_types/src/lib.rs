//! On-region data layout for the regionfs filesystem.
//!
//! The filesystem's entire persistent state lives inside one contiguous
//! memory region supplied by the host. The host may unmap the region and
//! map the same bytes at a different base address, so every reference kept
//! in the region is an offset (a block number for inter-block links, a
//! byte offset for intra-block records), never a process pointer.
//!
//! Region layout:
//!
//! | byte offset            | content      | type                          |
//! |------------------------|--------------|-------------------------------|
//! | 0                      | header       | [`FsHeader`]                  |
//! | [`NODE_TABLE_OFF`]     | inode table  | [`Inode`] × `ntsize * 8 - 1`  |
//! | `ntsize * BLOCK_SIZE`  | data blocks  | file bytes, [`DirEntry`] × 4, [`ChainBlock`], [`FreeRegion`] |
//!
//! The header occupies the first inode-sized slot of the table's first
//! block; inode 0 (the root directory) sits in the second slot. A region is
//! recognized as initialized when `header.size` equals the region's block
//! count.

#![no_std]

use core::fmt;

use dataview::{Pod, PodMethods as _};

/// Block size; allocation granularity and the unit of inter-block offsets.
pub const BLOCK_SIZE: usize = 1024;

/// Bytes per inode record.
pub const INODE_SIZE: usize = 128;

/// Inode records per inode-table block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Data block refs held directly in the inode.
pub const NUM_DIRECT_REFS: usize = 5;

/// Data block refs per chain (overflow index) block.
pub const NUM_CHAIN_REFS: usize = BLOCK_SIZE / size_of::<u64>() - 1;

/// Expected data blocks per file; sizes the inode table at initialization.
pub const BLOCKS_PER_FILE: usize = 4;

/// Maximum stored name length, including the NUL terminator.
pub const NAME_LEN: usize = 224;

/// Bytes per directory entry.
pub const DIR_ENTRY_SIZE: usize = 256;

/// Directory entries per data block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Byte offset of the inode table; the header shares the slot before it.
pub const NODE_TABLE_OFF: usize = INODE_SIZE;

/// "No block / no offset" sentinel: the largest representable offset.
pub const NULL_OFF: u64 = u64::MAX;

/// "No inode" sentinel; terminates the used prefix of a directory block.
pub const NO_NODE: u64 = u64::MAX;

/// Directory inode.
pub const T_DIR: u64 = 1;
/// Regular file inode.
pub const T_FILE: u64 = 2;

/// Blocks reserved for the inode table in a region of `region_blocks`
/// blocks: at least one inode slot per [`BLOCKS_PER_FILE`] data blocks.
#[must_use]
pub const fn inode_table_blocks(region_blocks: u64) -> u64 {
    let per_file = BLOCKS_PER_FILE as u64;
    let per_block = INODES_PER_BLOCK as u64;
    (per_file * (1 + per_block) + region_blocks) / (1 + per_file * per_block)
}

/// Chain blocks needed to index `nblocks` data blocks.
#[must_use]
pub const fn chain_blocks(nblocks: u64) -> u64 {
    if nblocks <= NUM_DIRECT_REFS as u64 {
        0
    } else {
        (nblocks - NUM_DIRECT_REFS as u64).div_ceil(NUM_CHAIN_REFS as u64)
    }
}

/// Compares two names under the truncation applied by
/// [`DirEntry::set_name`].
#[must_use]
pub fn names_equal(a: &[u8], b: &[u8]) -> bool {
    let a = &a[..usize::min(a.len(), NAME_LEN - 1)];
    let b = &b[..usize::min(b.len(), NAME_LEN - 1)];
    a == b
}

/// Block number within the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct BlockNo(u64);

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockNo {
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Byte offset of this block from the region base.
    #[must_use]
    pub const fn byte_off(&self) -> usize {
        self.0 as usize * BLOCK_SIZE
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == NULL_OFF { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub const fn to_raw(this: Option<Self>) -> u64 {
        match this {
            Some(b) => b.0,
            None => NULL_OFF,
        }
    }
}

/// Inode index: the record's slot in the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NodeId {
    /// The root directory, always slot 0.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == NO_NODE { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub const fn to_raw(this: Option<Self>) -> u64 {
        match this {
            Some(n) => n.0,
            None => NO_NODE,
        }
    }
}

/// Nanosecond-resolution wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
#[repr(C)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };
}

/// Region header, at byte offset 0.
///
/// `size` doubles as the initialized-marker: a region whose header `size`
/// already equals the region's block count is not re-initialized.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct FsHeader {
    /// Region size in blocks.
    pub size: u64,
    /// Blocks reserved for the inode table.
    pub ntsize: u64,
    /// Byte offset of the inode table.
    pub nodetbl: u64,
    /// Block offset of the first free region, or [`NULL_OFF`].
    freelist: u64,
    /// Free block count (cached; equals the sum of free-region sizes).
    pub free: u64,
}

impl FsHeader {
    #[must_use]
    pub fn freelist(&self) -> Option<BlockNo> {
        BlockNo::from_raw(self.freelist)
    }

    pub fn set_freelist(&mut self, head: Option<BlockNo>) {
        self.freelist = BlockNo::to_raw(head);
    }

    /// Inode slots in the table (the header consumes one).
    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.ntsize * INODES_PER_BLOCK as u64 - 1
    }
}

/// Inode record. `mode` 0 together with `nlinks` 0 marks a free slot.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct Inode {
    /// [`T_DIR`], [`T_FILE`], or 0 for a free slot.
    pub mode: u64,
    /// References from directory entries; 0 marks a free slot.
    pub nlinks: u64,
    /// Size in bytes for files, in entries for directories.
    pub size: u64,
    /// Data blocks currently owned.
    pub nblocks: u64,
    /// Direct data block refs.
    blocks: [u64; NUM_DIRECT_REFS],
    /// First chain block, or [`NULL_OFF`].
    blocklist: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Inode {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.mode != T_DIR && self.mode != T_FILE && self.nlinks == 0
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode == T_DIR
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.mode == T_FILE
    }

    /// Resets the record to an allocated, empty inode of the given mode
    /// with every block ref cleared.
    pub fn allocate(&mut self, mode: u64) {
        *self = Self::zeroed();
        self.mode = mode;
        self.blocks = [NULL_OFF; NUM_DIRECT_REFS];
        self.blocklist = NULL_OFF;
    }

    #[must_use]
    pub fn direct(&self, i: usize) -> Option<BlockNo> {
        BlockNo::from_raw(self.blocks[i])
    }

    pub fn set_direct(&mut self, i: usize, bn: Option<BlockNo>) {
        self.blocks[i] = BlockNo::to_raw(bn);
    }

    #[must_use]
    pub fn chain(&self) -> Option<BlockNo> {
        BlockNo::from_raw(self.blocklist)
    }

    pub fn set_chain(&mut self, bn: Option<BlockNo>) {
        self.blocklist = BlockNo::to_raw(bn);
    }
}

/// Chain (overflow index) block: extends an inode's block vector past the
/// direct refs. Never linked while empty.
#[derive(Pod)]
#[repr(C)]
pub struct ChainBlock {
    refs: [u64; NUM_CHAIN_REFS],
    next: u64,
}

impl ChainBlock {
    /// A chain block with every ref and the next link cleared.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            refs: [NULL_OFF; NUM_CHAIN_REFS],
            next: NULL_OFF,
        }
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<BlockNo> {
        BlockNo::from_raw(self.refs[i])
    }

    pub fn set(&mut self, i: usize, bn: Option<BlockNo>) {
        self.refs[i] = BlockNo::to_raw(bn);
    }

    #[must_use]
    pub fn next(&self) -> Option<BlockNo> {
        BlockNo::from_raw(self.next)
    }

    pub fn set_next(&mut self, bn: Option<BlockNo>) {
        self.next = BlockNo::to_raw(bn);
    }
}

/// Free-region descriptor, stored in the first bytes of each free run.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct FreeRegion {
    /// Contiguous free blocks in this run, including the descriptor's.
    pub size: u64,
    /// Next free region, strictly greater than this one, or [`NULL_OFF`].
    next: u64,
}

impl FreeRegion {
    #[must_use]
    pub fn new(size: u64, next: Option<BlockNo>) -> Self {
        Self {
            size,
            next: BlockNo::to_raw(next),
        }
    }

    #[must_use]
    pub fn next(&self) -> Option<BlockNo> {
        BlockNo::from_raw(self.next)
    }

    pub fn set_next(&mut self, bn: Option<BlockNo>) {
        self.next = BlockNo::to_raw(bn);
    }
}

/// Directory entry: inode index plus a fixed-length NUL-terminated name.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct DirEntry {
    node: u64,
    name: [u8; NAME_LEN],
    reserved: [u8; DIR_ENTRY_SIZE - NAME_LEN - size_of::<u64>()],
}

impl DirEntry {
    /// An unused entry; the first one in a directory block terminates the
    /// used prefix.
    #[must_use]
    pub fn empty() -> Self {
        let mut de = Self::zeroed();
        de.node = NO_NODE;
        de
    }

    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        NodeId::from_raw(self.node)
    }

    pub fn set_node(&mut self, node: Option<NodeId>) {
        self.node = NodeId::to_raw(node);
    }

    /// The stored name, without the NUL terminator.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// Stores `name`, truncated to [`NAME_LEN`]` - 1` bytes.
    pub fn set_name(&mut self, name: &[u8]) {
        let len = usize::min(name.len(), NAME_LEN - 1);
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }

    /// Compares against `name` under the same truncation as
    /// [`set_name`](Self::set_name).
    #[must_use]
    pub fn is_same_name(&self, name: &[u8]) -> bool {
        names_equal(self.name(), name)
    }
}

const _: () = const {
    assert!(size_of::<FsHeader>() <= NODE_TABLE_OFF);
    assert!(size_of::<TimeSpec>() == 16);
    assert!(size_of::<Inode>() == INODE_SIZE);
    assert!(size_of::<ChainBlock>() == BLOCK_SIZE);
    assert!(size_of::<FreeRegion>() == 16);
    assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);
    assert!(BLOCK_SIZE % DIR_ENTRY_SIZE == 0);
    assert!(BLOCK_SIZE % INODE_SIZE == 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizing_leaves_data_blocks() {
        for blocks in [2, 64, 1024, 1 << 20] {
            let nt = inode_table_blocks(blocks);
            assert!(nt >= 1);
            assert!(nt < blocks);
        }
    }

    #[test]
    fn chain_block_counts() {
        assert_eq!(chain_blocks(0), 0);
        assert_eq!(chain_blocks(NUM_DIRECT_REFS as u64), 0);
        assert_eq!(chain_blocks(NUM_DIRECT_REFS as u64 + 1), 1);
        assert_eq!(chain_blocks((NUM_DIRECT_REFS + NUM_CHAIN_REFS) as u64), 1);
        assert_eq!(
            chain_blocks((NUM_DIRECT_REFS + NUM_CHAIN_REFS) as u64 + 1),
            2
        );
    }

    #[test]
    fn dir_entry_name_truncation() {
        let mut de = DirEntry::empty();
        de.set_name(b"hello");
        assert_eq!(de.name(), b"hello");
        assert!(de.is_same_name(b"hello"));
        assert!(!de.is_same_name(b"hello2"));

        let long = [b'x'; NAME_LEN + 16];
        de.set_name(&long);
        assert_eq!(de.name().len(), NAME_LEN - 1);
        assert!(de.is_same_name(&long));
        assert!(de.is_same_name(&[b'x'; NAME_LEN - 1]));
    }

    #[test]
    fn sentinels_round_trip() {
        assert_eq!(BlockNo::from_raw(NULL_OFF), None);
        assert_eq!(BlockNo::to_raw(None), NULL_OFF);
        assert_eq!(NodeId::from_raw(7), Some(NodeId::new(7)));
        assert_eq!(NodeId::to_raw(Some(NodeId::new(7))), 7);
    }
}
