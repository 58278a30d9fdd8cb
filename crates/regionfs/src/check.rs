//! Whole-region consistency verification.
//!
//! Walks every structure the engines maintain and cross-checks them: the
//! free list, the block accounting, each live inode's block vector and
//! each directory's entry prefix. Hosts can run this after remounting an
//! image they do not trust.

use std::collections::HashSet;

use crate::{
    error::FsError,
    region::Filesystem,
    repr::{
        BLOCK_SIZE, BlockNo, ENTRIES_PER_BLOCK, NUM_CHAIN_REFS, NUM_DIRECT_REFS, NodeId,
        chain_blocks,
    },
};

impl Filesystem<'_> {
    /// Verifies the region's on-disk invariants.
    ///
    /// Returns [`FsError::Corrupted`] at the first violation.
    pub fn verify(&self) -> Result<(), FsError> {
        let header = self.header();
        let corrupt = |what: &str| {
            log::warn!("region check failed: {what}");
            FsError::Corrupted
        };

        if header.size != self.block_count() || header.ntsize == 0 || header.ntsize >= header.size {
            return Err(corrupt("header geometry"));
        }

        // Free list: ascending, coalesced, in the data area.
        let mut free_blocks: HashSet<u64> = HashSet::new();
        let mut cur = header.freelist();
        let mut last_end = 0;
        while let Some(bn) = cur {
            let reg = self.free_region(bn);
            if bn.value() < header.ntsize || bn.value() + reg.size > header.size || reg.size == 0 {
                return Err(corrupt("free run out of range"));
            }
            if bn.value() <= last_end && last_end != 0 {
                return Err(corrupt("free list unsorted or unmerged"));
            }
            for b in bn.value()..bn.value() + reg.size {
                free_blocks.insert(b);
            }
            last_end = bn.value() + reg.size;
            cur = reg.next();
        }
        if header.free != free_blocks.len() as u64 {
            return Err(corrupt("cached free count"));
        }

        // Inodes: decode every live block vector.
        let mut owned: HashSet<u64> = HashSet::new();
        let mut own = |bn: BlockNo| -> Result<(), FsError> {
            if bn.value() < header.ntsize || bn.value() >= header.size {
                return Err(FsError::Corrupted);
            }
            if free_blocks.contains(&bn.value()) || !owned.insert(bn.value()) {
                return Err(FsError::Corrupted);
            }
            Ok(())
        };

        let root = self.node(NodeId::ROOT);
        if !root.is_dir() || root.nlinks == 0 {
            return Err(corrupt("root inode"));
        }

        let mut dirs = Vec::new();
        for i in 0..header.node_count() {
            let node = NodeId::new(i);
            if !self.node_live(node) {
                continue;
            }
            let ino = self.node(node);

            if ino.size == 0 && (ino.nblocks != 0 || ino.chain().is_some()) {
                return Err(corrupt("empty inode owning blocks"));
            }
            let unit = if ino.is_dir() { BLOCK_SIZE / ENTRIES_PER_BLOCK } else { 1 };
            if ino.size.div_ceil((BLOCK_SIZE / unit) as u64) != ino.nblocks {
                return Err(corrupt("size and block count disagree"));
            }

            // Direct refs, then the chain; the decoded vector must be a
            // prefix of exactly nblocks distinct, non-free data blocks.
            let direct_n = u64::min(ino.nblocks, NUM_DIRECT_REFS as u64) as usize;
            for i in 0..NUM_DIRECT_REFS {
                match ino.direct(i) {
                    Some(bn) if i < direct_n => own(bn)?,
                    None if i >= direct_n => {}
                    _ => return Err(corrupt("direct refs not a prefix")),
                }
            }

            let mut chain_len = 0;
            let mut remaining = ino.nblocks.saturating_sub(NUM_DIRECT_REFS as u64);
            let mut cb = ino.chain();
            if remaining == 0 && cb.is_some() {
                return Err(corrupt("chain linked below the direct refs"));
            }
            while let Some(b) = cb {
                own(b)?;
                chain_len += 1;
                let chain = self.chain(b);
                let here = u64::min(remaining, NUM_CHAIN_REFS as u64) as usize;
                for slot in 0..NUM_CHAIN_REFS {
                    match chain.get(slot) {
                        Some(bn) if slot < here => own(bn)?,
                        None if slot >= here => {}
                        _ => return Err(corrupt("chain refs not a prefix")),
                    }
                }
                remaining -= here as u64;
                cb = chain.next();
                if remaining == 0 && cb.is_some() {
                    return Err(corrupt("chain longer than the block count"));
                }
            }
            if remaining != 0 || chain_len != chain_blocks(ino.nblocks) {
                return Err(corrupt("block vector length"));
            }

            if ino.is_dir() {
                dirs.push(node);
            }
        }

        // Accounting: every block is in the table, owned, or free.
        let used = header.ntsize + owned.len() as u64 + header.free;
        if used != header.size {
            return Err(corrupt("block accounting"));
        }

        // Directories: the used prefix is exactly `size` entries of live,
        // uniquely named inodes.
        for dir in dirs {
            let ino = self.node(dir);
            let mut names: HashSet<Vec<u8>> = HashSet::new();
            let mut seen = 0;
            'walk: for blk in 0..ino.nblocks {
                let bn = self
                    .block_at(&ino, blk)
                    .ok_or_else(|| corrupt("directory block missing"))?;
                for entry in 0..ENTRIES_PER_BLOCK {
                    let de = self.dir_entry(bn, entry);
                    let Some(child) = de.node() else { break 'walk };
                    if !self.node_live(child) {
                        return Err(corrupt("entry references a dead inode"));
                    }
                    if de.name().is_empty() || !names.insert(de.name().to_vec()) {
                        return Err(corrupt("duplicate or empty entry name"));
                    }
                    seen += 1;
                }
            }
            if seen != ino.size {
                return Err(corrupt("directory size and entry prefix disagree"));
            }
        }

        Ok(())
    }
}
