//! The filesystem handle: mount-time bootstrap and the only code that
//! turns offsets into memory.
//!
//! All typed access to the region copies records in and out through
//! [`DataView`], which tolerates the arbitrary alignment of a host-mapped
//! region; block payloads are exposed as byte slices. Nothing here or
//! above stores a process address in the region.

use dataview::{DataView, Pod, PodMethods as _};

use crate::{
    error::FsError,
    node,
    repr::{
        BLOCK_SIZE, BlockNo, ChainBlock, DIR_ENTRY_SIZE, DirEntry, FreeRegion, FsHeader,
        INODE_SIZE, Inode, NODE_TABLE_OFF, NodeId, T_DIR, inode_table_blocks,
    },
};

/// A mounted filesystem over a host-provided region.
///
/// Construction runs the one-time initialization if the region is fresh;
/// a region that was previously mounted (at any base address) resumes
/// as-is.
pub struct Filesystem<'r> {
    region: &'r mut [u8],
}

impl<'r> Filesystem<'r> {
    /// Mounts the region, initializing it on first use.
    ///
    /// Fails only when the region cannot hold the minimal layout of one
    /// inode-table block and one data block.
    pub fn mount(region: &'r mut [u8]) -> Result<Self, FsError> {
        if region.len() / BLOCK_SIZE < 2 {
            return Err(FsError::RegionTooSmall);
        }
        let mut fs = Filesystem { region };
        fs.init();
        Ok(fs)
    }

    /// Region size in blocks; trailing bytes short of a block are unused.
    pub(crate) fn block_count(&self) -> u64 {
        (self.region.len() / BLOCK_SIZE) as u64
    }

    fn init(&mut self) {
        let blocks = self.block_count();
        if self.header().size == blocks {
            return;
        }
        log::debug!("initializing fresh region of {blocks} blocks");

        let ntsize = inode_table_blocks(blocks);
        self.region[..ntsize as usize * BLOCK_SIZE].fill(0);

        let head = BlockNo::new(ntsize);
        let mut header = FsHeader::zeroed();
        header.ntsize = ntsize;
        header.nodetbl = NODE_TABLE_OFF as u64;
        header.free = blocks - ntsize;
        header.set_freelist(Some(head));
        self.put_header(&header);

        self.put_free_region(head, &FreeRegion::new(blocks - ntsize, None));

        let now = node::now();
        let mut root = Inode::zeroed();
        root.allocate(T_DIR);
        root.nlinks = 1;
        root.atime = now;
        root.mtime = now;
        root.ctime = now;
        self.put_node(NodeId::ROOT, &root);

        // The size marker goes in last so a partially initialized region
        // still reads as fresh.
        header.size = blocks;
        self.put_header(&header);
    }

    pub(crate) fn read_at<T: Pod>(&self, off: usize) -> T {
        DataView::from(&*self.region).read(off)
    }

    pub(crate) fn write_at<T: Pod>(&mut self, off: usize, value: &T) {
        DataView::from_mut(self.region).write(off, value);
    }

    pub(crate) fn header(&self) -> FsHeader {
        self.read_at(0)
    }

    pub(crate) fn put_header(&mut self, header: &FsHeader) {
        self.write_at(0, header);
    }

    pub(crate) fn block(&self, bn: BlockNo) -> &[u8] {
        &self.region[bn.byte_off()..bn.byte_off() + BLOCK_SIZE]
    }

    pub(crate) fn block_mut(&mut self, bn: BlockNo) -> &mut [u8] {
        &mut self.region[bn.byte_off()..bn.byte_off() + BLOCK_SIZE]
    }

    pub(crate) fn zero_block(&mut self, bn: BlockNo) {
        self.block_mut(bn).fill(0);
    }

    fn node_off(&self, node: NodeId) -> usize {
        self.header().nodetbl as usize + node.as_index() * INODE_SIZE
    }

    pub(crate) fn node(&self, node: NodeId) -> Inode {
        self.read_at(self.node_off(node))
    }

    pub(crate) fn put_node(&mut self, node: NodeId, inode: &Inode) {
        self.write_at(self.node_off(node), inode);
    }

    pub(crate) fn chain(&self, bn: BlockNo) -> ChainBlock {
        self.read_at(bn.byte_off())
    }

    pub(crate) fn put_chain(&mut self, bn: BlockNo, chain: &ChainBlock) {
        self.write_at(bn.byte_off(), chain);
    }

    pub(crate) fn free_region(&self, bn: BlockNo) -> FreeRegion {
        self.read_at(bn.byte_off())
    }

    pub(crate) fn put_free_region(&mut self, bn: BlockNo, reg: &FreeRegion) {
        self.write_at(bn.byte_off(), reg);
    }

    pub(crate) fn dir_entry(&self, bn: BlockNo, entry: usize) -> DirEntry {
        self.read_at(bn.byte_off() + entry * DIR_ENTRY_SIZE)
    }

    pub(crate) fn put_dir_entry(&mut self, bn: BlockNo, entry: usize, de: &DirEntry) {
        self.write_at(bn.byte_off() + entry * DIR_ENTRY_SIZE, de);
    }
}
