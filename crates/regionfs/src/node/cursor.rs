//! File position cursor.
//!
//! Translates a logical offset (bytes for files, entries for directories)
//! into a (data block, in-block index) pair by walking the inode's direct
//! refs and chain blocks. The cursor is transient; it never outlives the
//! call that created it and holds offsets only.

use crate::{
    region::Filesystem,
    repr::{BLOCK_SIZE, BlockNo, DIR_ENTRY_SIZE, NUM_CHAIN_REFS, NUM_DIRECT_REFS, NodeId},
};

pub(crate) struct Cursor {
    node: NodeId,
    /// Logical unit: 1 byte for files, one entry for directories.
    unit: usize,
    /// Logical block index of `dblk`.
    nblk: u64,
    /// Chain block currently indexed through, if past the direct refs.
    oblk: Option<BlockNo>,
    /// Ref slot within the inode's direct refs or within `oblk`.
    opos: usize,
    /// Current data block.
    dblk: Option<BlockNo>,
    /// Unit index within `dblk`.
    dpos: usize,
    /// Set once the cursor sits at (or past) the end of the contents.
    at_end: bool,
}

impl Cursor {
    /// A cursor at the start of `node`'s contents, or `None` when `node`
    /// is not live.
    pub(crate) fn load(fs: &Filesystem, node: NodeId) -> Option<Cursor> {
        if !fs.node_live(node) {
            return None;
        }
        let ino = fs.node(node);
        let unit = if ino.is_dir() { DIR_ENTRY_SIZE } else { 1 };
        Some(Cursor {
            node,
            unit,
            nblk: 0,
            oblk: None,
            opos: 0,
            dblk: ino.direct(0),
            dpos: 0,
            at_end: ino.size == 0,
        })
    }

    /// The current position as (data block, unit index), or `None` at the
    /// end of the contents.
    pub(crate) fn pos(&self) -> Option<(BlockNo, usize)> {
        if self.at_end {
            return None;
        }
        self.dblk.map(|b| (b, self.dpos))
    }

    /// Moves forward by whole blocks, stopping at the end of the block
    /// chain. Returns the number of blocks actually advanced.
    pub(crate) fn advance(&mut self, fs: &Filesystem, blks: u64) -> u64 {
        if self.dblk.is_none() {
            return 0;
        }
        let ino = fs.node(self.node);
        let mut adv = 0;
        self.dpos = 0;
        while adv < blks {
            let next_slot = self.opos + 1;
            let next = match self.oblk {
                None => {
                    if next_slot == NUM_DIRECT_REFS {
                        let Some(cb) = ino.chain() else { break };
                        let Some(d) = fs.chain(cb).get(0) else { break };
                        self.oblk = Some(cb);
                        self.opos = 0;
                        d
                    } else {
                        let Some(d) = ino.direct(next_slot) else { break };
                        self.opos = next_slot;
                        d
                    }
                }
                Some(cb) => {
                    let chain = fs.chain(cb);
                    if next_slot == NUM_CHAIN_REFS {
                        let Some(nb) = chain.next() else { break };
                        let Some(d) = fs.chain(nb).get(0) else { break };
                        self.oblk = Some(nb);
                        self.opos = 0;
                        d
                    } else {
                        let Some(d) = chain.get(next_slot) else { break };
                        self.opos = next_slot;
                        d
                    }
                }
            };
            self.dblk = Some(next);
            self.nblk += 1;
            adv += 1;
        }
        adv
    }

    /// Moves forward by `off` logical units, refusing to pass the end of
    /// the contents (the cursor parks at the boundary instead). Returns
    /// the units actually advanced.
    pub(crate) fn seek(&mut self, fs: &Filesystem, off: u64) -> u64 {
        if self.at_end {
            return 0;
        }
        let size = fs.node(self.node).size;
        let per_block = (BLOCK_SIZE / self.unit) as u64;
        let cur = self.nblk * per_block + self.dpos as u64;
        let dest = u64::min(cur + off, size);

        let dest_blk = dest / per_block;
        self.advance(fs, dest_blk - self.nblk);
        if self.nblk < dest_blk {
            // Block chain ended at the boundary (contents end on a block
            // edge); park past the end.
            self.at_end = true;
            return dest - cur;
        }
        self.dpos = (dest % per_block) as usize;
        self.at_end = dest == size;
        dest - cur
    }
}
