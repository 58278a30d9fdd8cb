//! Directories.
//!
//! A directory's contents is an array of [`DirEntry`] records packed into
//! its data blocks, four per block. The used entries form a prefix; the
//! first unused entry (node = NO_NODE) terminates it, unless the prefix
//! exactly fills the allocated blocks. Lookup, insert, remove and rename
//! all ride on one scan that tracks enough of the block chain to trim a
//! block that empties.

use crate::{
    alloc,
    error::FsError,
    region::Filesystem,
    repr::{
        BlockNo, ChainBlock, DirEntry, ENTRIES_PER_BLOCK, Inode, NUM_CHAIN_REFS, NUM_DIRECT_REFS,
        NodeId, names_equal,
    },
};

/// A located entry.
struct Found {
    dblk: BlockNo,
    entry: usize,
    node: NodeId,
}

/// Where a scan stopped: the terminator slot, or the end of the block
/// chain with the ref slot a new block would occupy.
struct ScanEnd {
    /// Chain block the end position is indexed through, if any.
    oblk: Option<BlockNo>,
    /// The chain block before `oblk`.
    prev_oblk: Option<BlockNo>,
    /// Ref slot within the direct refs or within `oblk`.
    slot: usize,
    /// Block holding the terminator; `None` when the chain ended first.
    dblk: Option<BlockNo>,
    /// Terminator's entry index within `dblk`.
    entry: usize,
}

struct Scan {
    found: Option<Found>,
    /// A `watch` name matched an existing entry.
    collision: bool,
    end: ScanEnd,
}

fn scan(fs: &Filesystem, dir: &Inode, name: &[u8], watch: Option<&[u8]>) -> Scan {
    let mut oblk: Option<BlockNo> = None;
    let mut prev_oblk: Option<BlockNo> = None;
    let mut slot = 0usize;
    let mut dblk = dir.direct(0);
    let mut found = None;

    while let Some(b) = dblk {
        for entry in 0..ENTRIES_PER_BLOCK {
            let de = fs.dir_entry(b, entry);
            let Some(node) = de.node() else {
                return Scan {
                    found,
                    collision: false,
                    end: ScanEnd {
                        oblk,
                        prev_oblk,
                        slot,
                        dblk: Some(b),
                        entry,
                    },
                };
            };
            if watch.is_some_and(|w| de.is_same_name(w)) {
                return Scan {
                    found,
                    collision: true,
                    end: ScanEnd {
                        oblk,
                        prev_oblk,
                        slot,
                        dblk: Some(b),
                        entry,
                    },
                };
            }
            if de.is_same_name(name) {
                found = Some(Found {
                    dblk: b,
                    entry,
                    node,
                });
            }
        }

        slot += 1;
        if let Some(cb) = oblk {
            let chain = fs.chain(cb);
            if slot == NUM_CHAIN_REFS {
                match chain.next() {
                    Some(nb) => {
                        prev_oblk = oblk;
                        oblk = Some(nb);
                        slot = 0;
                        dblk = fs.chain(nb).get(0);
                    }
                    None => dblk = None,
                }
            } else {
                dblk = chain.get(slot);
            }
        } else if slot == NUM_DIRECT_REFS {
            match dir.chain() {
                Some(cb) => {
                    oblk = Some(cb);
                    slot = 0;
                    dblk = fs.chain(cb).get(0);
                }
                None => dblk = None,
            }
        } else {
            dblk = dir.direct(slot);
        }
    }

    Scan {
        found,
        collision: false,
        end: ScanEnd {
            oblk,
            prev_oblk,
            slot,
            dblk: None,
            entry: 0,
        },
    }
}

impl Filesystem<'_> {
    /// Loads `dir`'s inode, requiring a live directory.
    fn require_dir(&self, dir: NodeId) -> Result<Inode, FsError> {
        if !self.node_live(dir) {
            return Err(FsError::EntryNotFound);
        }
        let ino = self.node(dir);
        if !ino.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(ino)
    }

    /// Looks `name` up in `dir`.
    pub(crate) fn dir_lookup(&self, dir: NodeId, name: &str) -> Result<Option<NodeId>, FsError> {
        let ino = self.require_dir(dir)?;
        if name.is_empty() {
            return Ok(None);
        }
        Ok(scan(self, &ino, name.as_bytes(), None).found.map(|f| f.node))
    }

    /// Inserts `(name, node)` into `dir`, failing on a name collision.
    ///
    /// Counts the new reference on `node`'s inode. When the used prefix
    /// has filled every allocated block, one data block (and, crossing an
    /// index boundary, one chain block) is added; on a short allocation
    /// the partial batch is returned and nothing changes.
    pub(crate) fn dir_insert(
        &mut self,
        dir: NodeId,
        name: &str,
        node: NodeId,
    ) -> Result<(), FsError> {
        let mut ino = self.require_dir(dir)?;
        if name.is_empty() {
            return Err(FsError::EntryNotFound);
        }

        let scan = scan(self, &ino, name.as_bytes(), None);
        if scan.found.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut de = DirEntry::empty();
        de.set_node(Some(node));
        de.set_name(name.as_bytes());

        match scan.end.dblk {
            Some(b) => {
                self.put_dir_entry(b, scan.end.entry, &de);
                if scan.end.entry + 1 < ENTRIES_PER_BLOCK {
                    self.put_dir_entry(b, scan.end.entry + 1, &DirEntry::empty());
                }
            }
            None => {
                // Every allocated block is full; link a fresh one at the
                // ref slot the scan stopped on.
                let need_chain = (scan.end.oblk.is_none() && scan.end.slot == NUM_DIRECT_REFS)
                    || (scan.end.oblk.is_some() && scan.end.slot == NUM_CHAIN_REFS);
                let want: u64 = if need_chain { 2 } else { 1 };
                let batch = alloc::allocate(self, want);
                if (batch.len() as u64) < want {
                    alloc::release(self, batch);
                    return Err(FsError::StorageOutOfBlocks);
                }

                let data = *batch.last().expect("batch is non-empty");
                if need_chain {
                    let cb = batch[0];
                    let mut chain = ChainBlock::empty();
                    chain.set(0, Some(data));
                    self.put_chain(cb, &chain);
                    match scan.end.oblk {
                        Some(prev) => {
                            let mut pc = self.chain(prev);
                            pc.set_next(Some(cb));
                            self.put_chain(prev, &pc);
                        }
                        None => ino.set_chain(Some(cb)),
                    }
                } else {
                    match scan.end.oblk {
                        Some(cb) => {
                            let mut chain = self.chain(cb);
                            chain.set(scan.end.slot, Some(data));
                            self.put_chain(cb, &chain);
                        }
                        None => ino.set_direct(scan.end.slot, Some(data)),
                    }
                }

                self.put_dir_entry(data, 0, &de);
                for entry in 1..ENTRIES_PER_BLOCK {
                    self.put_dir_entry(data, entry, &DirEntry::empty());
                }
                ino.nblocks += 1;
            }
        }

        ino.size += 1;
        self.put_node(dir, &ino);

        let mut target = self.node(node);
        target.nlinks += 1;
        self.put_node(node, &target);
        Ok(())
    }

    /// Removes `name` from `dir`, returning the unlinked inode.
    ///
    /// The vacated slot is filled with the directory's last entry and the
    /// freed slot becomes the terminator; a data block that empties is
    /// released, along with a chain block left indexing nothing.
    /// A non-empty directory with no other link cannot be removed.
    pub(crate) fn dir_remove(&mut self, dir: NodeId, name: &str) -> Result<NodeId, FsError> {
        let mut ino = self.require_dir(dir)?;
        if name.is_empty() {
            return Err(FsError::EntryNotFound);
        }

        let scan = scan(self, &ino, name.as_bytes(), None);
        let Some(found) = scan.found else {
            return Err(FsError::EntryNotFound);
        };
        let target = self.node(found.node);
        if target.is_dir() && target.nlinks == 1 && target.size > 0 {
            return Err(FsError::DirectoryNotEmpty);
        }

        // The last occupied entry: just before the terminator, or the
        // final entry of the last block when the prefix fills every block.
        let (last_dblk, last_entry, last_oblk, last_slot) = match scan.end.dblk {
            Some(b) => (b, scan.end.entry - 1, scan.end.oblk, scan.end.slot),
            None => {
                let (dblk, slot) = match scan.end.oblk {
                    Some(cb) => (
                        self.chain(cb)
                            .get(scan.end.slot - 1)
                            .expect("scan walked through this ref"),
                        scan.end.slot - 1,
                    ),
                    None => (
                        ino.direct(scan.end.slot - 1)
                            .expect("scan walked through this ref"),
                        scan.end.slot - 1,
                    ),
                };
                (dblk, ENTRIES_PER_BLOCK - 1, scan.end.oblk, slot)
            }
        };

        let last = self.dir_entry(last_dblk, last_entry);
        self.put_dir_entry(found.dblk, found.entry, &last);
        self.put_dir_entry(last_dblk, last_entry, &DirEntry::empty());

        if last_entry == 0 {
            // The last block emptied; unhook and free it.
            let mut freed = vec![last_dblk];
            match last_oblk {
                Some(cb) => {
                    let mut chain = self.chain(cb);
                    chain.set(last_slot, None);
                    self.put_chain(cb, &chain);
                    if last_slot == 0 {
                        // The chain block no longer indexes anything.
                        freed.push(cb);
                        match scan.end.prev_oblk {
                            Some(prev) => {
                                let mut pc = self.chain(prev);
                                pc.set_next(None);
                                self.put_chain(prev, &pc);
                            }
                            None => ino.set_chain(None),
                        }
                    }
                }
                None => ino.set_direct(last_slot, None),
            }
            alloc::release(self, freed);
            ino.nblocks -= 1;
        }

        ino.size -= 1;
        self.put_node(dir, &ino);

        let mut target = self.node(found.node);
        target.nlinks -= 1;
        self.put_node(found.node, &target);
        Ok(found.node)
    }

    /// Renames `name` to `new_name` within `dir`, in place.
    pub(crate) fn dir_rename(
        &mut self,
        dir: NodeId,
        name: &str,
        new_name: &str,
    ) -> Result<(), FsError> {
        let ino = self.require_dir(dir)?;
        if name.is_empty() || new_name.is_empty() {
            return Err(FsError::EntryNotFound);
        }
        if names_equal(name.as_bytes(), new_name.as_bytes()) {
            return Ok(());
        }

        let scan = scan(self, &ino, name.as_bytes(), Some(new_name.as_bytes()));
        if scan.collision {
            return Err(FsError::AlreadyExists);
        }
        let Some(found) = scan.found else {
            return Err(FsError::EntryNotFound);
        };

        let mut de = self.dir_entry(found.dblk, found.entry);
        de.set_name(new_name.as_bytes());
        self.put_dir_entry(found.dblk, found.entry, &de);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dataview::PodMethods as _;

    use super::*;
    use crate::repr::{BLOCK_SIZE, T_FILE};

    fn mounted(mem: &mut Vec<u8>) -> Filesystem<'_> {
        Filesystem::mount(mem).unwrap()
    }

    /// Allocates a bare file inode the way `mknod` does, without a path.
    fn fresh_node(fs: &mut Filesystem) -> NodeId {
        let node = fs.alloc_node().unwrap();
        let mut ino = Inode::zeroed();
        ino.allocate(T_FILE);
        fs.put_node(node, &ino);
        node
    }

    #[test]
    fn insert_lookup_remove() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        let root = NodeId::ROOT;

        let a = fresh_node(&mut fs);
        fs.dir_insert(root, "a", a).unwrap();
        assert_eq!(fs.dir_lookup(root, "a").unwrap(), Some(a));
        assert_eq!(fs.dir_lookup(root, "b").unwrap(), None);
        assert_eq!(fs.node(a).nlinks, 1);
        assert_eq!(fs.node(root).size, 1);

        assert_eq!(
            fs.dir_insert(root, "a", a).unwrap_err(),
            FsError::AlreadyExists
        );

        assert_eq!(fs.dir_remove(root, "a").unwrap(), a);
        assert_eq!(fs.dir_lookup(root, "a").unwrap(), None);
        assert_eq!(fs.node(a).nlinks, 0);
        let root_ino = fs.node(root);
        assert_eq!((root_ino.size, root_ino.nblocks), (0, 0));
    }

    #[test]
    fn remove_swaps_last_entry_into_hole() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        let root = NodeId::ROOT;

        let nodes: Vec<_> = (0..3).map(|_| fresh_node(&mut fs)).collect();
        fs.dir_insert(root, "one", nodes[0]).unwrap();
        fs.dir_insert(root, "two", nodes[1]).unwrap();
        fs.dir_insert(root, "three", nodes[2]).unwrap();

        fs.dir_remove(root, "one").unwrap();
        // "three" moved into the vacated slot; everything still resolves.
        assert_eq!(fs.dir_lookup(root, "two").unwrap(), Some(nodes[1]));
        assert_eq!(fs.dir_lookup(root, "three").unwrap(), Some(nodes[2]));
        assert_eq!(fs.node(root).size, 2);
    }

    #[test]
    fn directory_grows_and_trims_blocks() {
        let mut mem = vec![0; 256 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        let root = NodeId::ROOT;
        let free0 = fs.header().free;

        // Fill past the direct refs: 5 blocks of 4 entries each, plus one
        // entry that forces the first chain block.
        let count = NUM_DIRECT_REFS * ENTRIES_PER_BLOCK + 1;
        for i in 0..count {
            let n = fresh_node(&mut fs);
            fs.dir_insert(root, &format!("f{i}"), n).unwrap();
        }
        let ino = fs.node(root);
        assert_eq!(ino.size, count as u64);
        assert_eq!(ino.nblocks, NUM_DIRECT_REFS as u64 + 1);
        assert!(ino.chain().is_some());

        for i in (0..count).rev() {
            fs.dir_remove(root, &format!("f{i}")).unwrap();
        }
        let ino = fs.node(root);
        assert_eq!((ino.size, ino.nblocks), (0, 0));
        assert_eq!(ino.chain(), None);
        // Entry blocks and the chain block all returned to the pool
        // (the file inodes held no data).
        assert_eq!(fs.header().free, free0);
    }

    #[test]
    fn rename_in_place() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        let root = NodeId::ROOT;

        let a = fresh_node(&mut fs);
        let b = fresh_node(&mut fs);
        fs.dir_insert(root, "a", a).unwrap();
        fs.dir_insert(root, "b", b).unwrap();

        assert_eq!(
            fs.dir_rename(root, "a", "b").unwrap_err(),
            FsError::AlreadyExists
        );
        fs.dir_rename(root, "a", "a").unwrap();
        fs.dir_rename(root, "a", "c").unwrap();
        assert_eq!(fs.dir_lookup(root, "a").unwrap(), None);
        assert_eq!(fs.dir_lookup(root, "c").unwrap(), Some(a));
        assert_eq!(
            fs.dir_rename(root, "missing", "x").unwrap_err(),
            FsError::EntryNotFound
        );
    }

    #[test]
    fn refuses_non_empty_directory_removal() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = mounted(&mut mem);
        let root = NodeId::ROOT;

        fs.mkdir("/d").unwrap();
        fs.mknod("/d/f").unwrap();
        assert_eq!(
            fs.dir_remove(root, "d").unwrap_err(),
            FsError::DirectoryNotEmpty
        );
        fs.unlink("/d/f").unwrap();
        fs.dir_remove(root, "d").unwrap();
    }
}
