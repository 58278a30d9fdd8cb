//! Inode content: the block-list engine and byte-level file I/O.
//!
//! A file's data sits in the blocks named by the inode's direct refs
//! followed by the refs of its chain blocks. [`Filesystem::resize`] grows
//! and shrinks that vector; growth pre-allocates the whole batch of data
//! and chain blocks in one allocator call so a failure leaves the inode
//! untouched.

use crate::{
    alloc,
    error::FsError,
    node::Cursor,
    region::Filesystem,
    repr::{
        BLOCK_SIZE, BlockNo, ChainBlock, Inode, NUM_CHAIN_REFS, NUM_DIRECT_REFS, NodeId,
        chain_blocks,
    },
};

impl Filesystem<'_> {
    /// Grows or shrinks a file's logical size to `size` bytes.
    ///
    /// Newly covered bytes read as zeros: fresh blocks come zeroed from
    /// the allocator and the tail of the old last block is zeroed before
    /// the file grows over it. On allocation failure nothing changes.
    pub(crate) fn resize(&mut self, node: NodeId, size: u64) -> Result<(), FsError> {
        let mut ino = self.node(node);
        if !ino.is_file() {
            return Err(FsError::IsADirectory);
        }

        let old_size = ino.size;
        let old_blks = ino.nblocks;
        let new_blks = size.div_ceil(BLOCK_SIZE as u64);

        if new_blks < old_blks {
            self.shrink(&mut ino, new_blks);
        } else if size > old_size {
            let tail = (old_size % BLOCK_SIZE as u64) as usize;
            if tail != 0 {
                let last = self
                    .block_at(&ino, old_blks - 1)
                    .expect("sized file has a last block");
                self.block_mut(last)[tail..].fill(0);
            }
            if new_blks > old_blks {
                self.grow(&mut ino, new_blks)?;
            }
        }

        ino.size = size;
        ino.nblocks = new_blks;
        self.put_node(node, &ino);
        Ok(())
    }

    /// Frees the block vector's tail down to `new_blks` data blocks,
    /// dropping chain blocks that no longer index anything.
    fn shrink(&mut self, ino: &mut Inode, new_blks: u64) {
        let old_blks = ino.nblocks;
        let keep_chain = chain_blocks(new_blks);
        let mut freed: Vec<BlockNo> = Vec::new();

        for i in new_blks..u64::min(old_blks, NUM_DIRECT_REFS as u64) {
            if let Some(bn) = ino.direct(i as usize) {
                freed.push(bn);
                ino.set_direct(i as usize, None);
            }
        }

        if let Some(head) = ino.chain() {
            let mut cur = Some(head);
            let mut ci = 0u64;
            while let Some(cb) = cur {
                let mut chain = self.chain(cb);
                let next = chain.next();
                let first_logical = NUM_DIRECT_REFS as u64 + ci * NUM_CHAIN_REFS as u64;
                if ci < keep_chain {
                    let mut dirty = false;
                    for slot in 0..NUM_CHAIN_REFS {
                        let logical = first_logical + slot as u64;
                        if logical < new_blks || logical >= old_blks {
                            continue;
                        }
                        if let Some(bn) = chain.get(slot) {
                            freed.push(bn);
                            chain.set(slot, None);
                            dirty = true;
                        }
                    }
                    if ci + 1 == keep_chain && next.is_some() {
                        chain.set_next(None);
                        dirty = true;
                    }
                    if dirty {
                        self.put_chain(cb, &chain);
                    }
                } else {
                    for slot in 0..NUM_CHAIN_REFS {
                        if let Some(bn) = chain.get(slot) {
                            freed.push(bn);
                        }
                    }
                    freed.push(cb);
                }
                cur = next;
                ci += 1;
            }
            if keep_chain == 0 {
                ino.set_chain(None);
            }
        }

        alloc::release(self, freed);
    }

    /// Extends the block vector to `new_blks` data blocks.
    ///
    /// The data blocks and the chain blocks needed to index them are
    /// allocated as one batch; a short batch is handed straight back and
    /// the inode is left as it was.
    fn grow(&mut self, ino: &mut Inode, new_blks: u64) -> Result<(), FsError> {
        let old_blks = ino.nblocks;
        let want = (new_blks - old_blks) + (chain_blocks(new_blks) - chain_blocks(old_blks));
        let batch = alloc::allocate(self, want);
        if (batch.len() as u64) < want {
            alloc::release(self, batch);
            return Err(FsError::StorageOutOfBlocks);
        }
        let mut batch = batch.into_iter();

        // Chain block holding the next free ref slot, if the vector
        // already reaches past the direct refs.
        let mut tail: Option<(BlockNo, ChainBlock)> = None;
        if old_blks > NUM_DIRECT_REFS as u64 {
            let mut cb = ino.chain().expect("vector past direct refs has a chain");
            for _ in 0..(old_blks - NUM_DIRECT_REFS as u64 - 1) / NUM_CHAIN_REFS as u64 {
                cb = self.chain(cb).next().expect("chain shorter than nblocks");
            }
            tail = Some((cb, self.chain(cb)));
        }

        for idx in old_blks..new_blks {
            let data = batch.next().expect("batch sized for the growth");
            if idx < NUM_DIRECT_REFS as u64 {
                ino.set_direct(idx as usize, Some(data));
                continue;
            }
            let slot = ((idx - NUM_DIRECT_REFS as u64) % NUM_CHAIN_REFS as u64) as usize;
            if slot == 0 {
                // The previous ref holder is full (or absent): the block we
                // just pulled becomes the new chain block and the next one
                // is its first data block.
                let cb = data;
                let mut chain = ChainBlock::empty();
                chain.set(0, Some(batch.next().expect("batch sized for the growth")));
                match tail.take() {
                    Some((pb, mut pc)) => {
                        pc.set_next(Some(cb));
                        self.put_chain(pb, &pc);
                    }
                    None => ino.set_chain(Some(cb)),
                }
                tail = Some((cb, chain));
            } else {
                let (_, chain) = tail.as_mut().expect("slot > 0 implies a chain tail");
                chain.set(slot, Some(data));
            }
        }
        if let Some((cb, chain)) = tail {
            self.put_chain(cb, &chain);
        }
        Ok(())
    }

    /// Reads into `buf` starting at byte `off`, clamped to the file size.
    pub(crate) fn read_file_at(&self, node: NodeId, buf: &mut [u8], off: u64) -> usize {
        let size = self.node(node).size;
        if off >= size {
            return 0;
        }
        let n = usize::min(buf.len(), (size - off) as usize);
        let Some(mut cur) = Cursor::load(self, node) else {
            return 0;
        };
        cur.seek(self, off);

        let mut tot = 0;
        while tot < n {
            let Some((dblk, dpos)) = cur.pos() else { break };
            let m = usize::min(n - tot, BLOCK_SIZE - dpos);
            buf[tot..tot + m].copy_from_slice(&self.block(dblk)[dpos..dpos + m]);
            tot += m;
            cur.seek(self, m as u64);
        }
        tot
    }

    /// Writes `buf` at byte `off`, extending the file one block at a time
    /// past its current end. Returns the bytes written, which fall short
    /// of `buf.len()` only when the region runs out of blocks.
    pub(crate) fn write_file_at(&mut self, node: NodeId, buf: &[u8], off: u64) -> usize {
        let mut tot = 0;
        while tot < buf.len() {
            let ino = self.node(node);
            let pos = off + tot as u64;
            if pos >= ino.size {
                let target = u64::min(off + buf.len() as u64, (ino.nblocks + 1) * BLOCK_SIZE as u64);
                if self.resize(node, target).is_err() {
                    break;
                }
                continue;
            }

            let Some(mut cur) = Cursor::load(self, node) else {
                break;
            };
            cur.seek(self, pos);
            let Some((dblk, dpos)) = cur.pos() else { break };
            let within = (ino.size - pos) as usize;
            let m = usize::min(usize::min(buf.len() - tot, BLOCK_SIZE - dpos), within);
            self.block_mut(dblk)[dpos..dpos + m].copy_from_slice(&buf[tot..tot + m]);
            tot += m;
        }
        tot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;

    const B: u64 = BLOCK_SIZE as u64;

    fn mounted(mem: &mut Vec<u8>) -> Filesystem<'_> {
        Filesystem::mount(mem).unwrap()
    }

    fn file_node(fs: &Filesystem, at: &str) -> NodeId {
        path::resolve(fs, at).unwrap()
    }

    #[test]
    fn grow_and_shrink_account_blocks() {
        let mut mem = vec![0; 700 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        fs.mknod("/f").unwrap();
        let node = file_node(&fs, "/f");
        let free0 = fs.header().free;

        // Through the direct refs, into the chain.
        fs.resize(node, 3 * B).unwrap();
        assert_eq!(fs.header().free, free0 - 3);
        fs.resize(node, 200 * B).unwrap();
        let ino = fs.node(node);
        assert_eq!(ino.nblocks, 200);
        // 200 data blocks need two chain blocks.
        assert_eq!(fs.header().free, free0 - 202);

        // Shrink back within the direct refs.
        fs.resize(node, 2 * B).unwrap();
        let ino = fs.node(node);
        assert_eq!(ino.nblocks, 2);
        assert_eq!(ino.chain(), None);
        assert_eq!(fs.header().free, free0 - 2);

        fs.resize(node, 0).unwrap();
        assert_eq!(fs.header().free, free0);
        let ino = fs.node(node);
        assert_eq!((ino.size, ino.nblocks), (0, 0));
        assert_eq!(ino.direct(0), None);
    }

    #[test]
    fn grow_zero_fills_old_tail() {
        let mut mem = vec![0; 32 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        fs.mknod("/f").unwrap();
        let node = file_node(&fs, "/f");

        assert_eq!(fs.write_file_at(node, b"abc", 0), 3);
        // Scribble on the block tail behind the file's back, then grow
        // over it; the gap must read back as zeros.
        fs.resize(node, 3).unwrap();
        let bn = fs.block_at(&fs.node(node), 0).unwrap();
        fs.block_mut(bn)[3..8].fill(0xAA);
        fs.resize(node, 100).unwrap();

        let mut buf = [0xFFu8; 100];
        assert_eq!(fs.read_file_at(node, &mut buf, 0), 100);
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_fails_cleanly_when_out_of_space() {
        let mut mem = vec![0; 8 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        fs.mknod("/f").unwrap();
        let node = file_node(&fs, "/f");
        let free0 = fs.header().free;

        fs.resize(node, B).unwrap();
        let err = fs.resize(node, 1000 * B).unwrap_err();
        assert_eq!(err, FsError::StorageOutOfBlocks);
        // The failed growth must not leak or mutate.
        let ino = fs.node(node);
        assert_eq!((ino.size, ino.nblocks), (B, 1));
        assert_eq!(fs.header().free, free0 - 1);
    }

    #[test]
    fn short_write_on_exhaustion() {
        let mut mem = vec![0; 8 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        fs.mknod("/f").unwrap();
        let node = file_node(&fs, "/f");
        // One table block, one root entry block; six blocks left.
        assert_eq!(fs.header().free, 6);

        // Five fit in the direct refs; the sixth would also need a chain
        // block, which no longer fits.
        let data = vec![0x5A; 64 * BLOCK_SIZE];
        let written = fs.write_file_at(node, &data, 0);
        assert_eq!(written, 5 * BLOCK_SIZE);
        assert_eq!(fs.node(node).size, written as u64);
        assert_eq!(fs.header().free, 1);
    }

    #[test]
    fn resize_rejects_directories() {
        let mut mem = vec![0; 16 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        fs.mkdir("/d").unwrap();
        let node = path::resolve(&fs, "/d").unwrap();
        assert_eq!(fs.resize(node, 10).unwrap_err(), FsError::IsADirectory);
    }
}
