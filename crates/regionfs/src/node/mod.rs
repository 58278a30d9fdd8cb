//! Inodes.
//!
//! An inode describes a single file or directory. The record holds the
//! mode, the link count, the logical size (bytes for files, entries for
//! directories), and the block vector: [`NUM_DIRECT_REFS`] direct refs in
//! the record itself, extended by a singly linked list of chain blocks.
//!
//! Records live in a fixed table carved out of the region's front; an
//! inode's number is its slot index. Slot 0 is the root directory and is
//! never recycled. A slot with mode 0 and no links is free; releasing an
//! inode frees its data blocks and zeroes the record.

use std::time::{SystemTime, UNIX_EPOCH};

use dataview::PodMethods as _;

use crate::{
    region::Filesystem,
    repr::{BlockNo, Inode, NUM_CHAIN_REFS, NUM_DIRECT_REFS, NodeId, TimeSpec},
};

mod content;
mod cursor;
mod directory;

pub(crate) use cursor::Cursor;

/// Current wall-clock time as an on-region timestamp.
pub(crate) fn now() -> TimeSpec {
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    TimeSpec {
        sec: t.as_secs() as i64,
        nsec: i64::from(t.subsec_nanos()),
    }
}

impl Filesystem<'_> {
    /// Finds a free inode slot.
    ///
    /// The slot is not marked; the caller initializes the record before
    /// the inode becomes reachable.
    pub(crate) fn alloc_node(&mut self) -> Option<NodeId> {
        let count = self.header().node_count();
        for i in 1..count {
            let node = NodeId::new(i);
            if self.node(node).is_free() {
                return Some(node);
            }
        }
        log::debug!("no free inode slots");
        None
    }

    /// Releases an inode slot after its last link went away.
    pub(crate) fn clear_node(&mut self, node: NodeId) {
        self.put_node(node, &Inode::zeroed());
    }

    /// Whether `node` names a live (linked) inode.
    pub(crate) fn node_live(&self, node: NodeId) -> bool {
        if node.value() >= self.header().node_count() {
            return false;
        }
        let ino = self.node(node);
        (ino.is_dir() || ino.is_file()) && ino.nlinks > 0
    }

    pub(crate) fn touch_atime(&mut self, node: NodeId, at: TimeSpec) {
        let mut ino = self.node(node);
        ino.atime = at;
        self.put_node(node, &ino);
    }

    pub(crate) fn touch_mtime(&mut self, node: NodeId, at: TimeSpec) {
        let mut ino = self.node(node);
        ino.mtime = at;
        self.put_node(node, &ino);
    }

    /// Data block at logical index `idx` of `ino`'s block vector.
    pub(crate) fn block_at(&self, ino: &Inode, idx: u64) -> Option<BlockNo> {
        if idx >= ino.nblocks {
            return None;
        }
        if idx < NUM_DIRECT_REFS as u64 {
            return ino.direct(idx as usize);
        }
        let mut rest = idx - NUM_DIRECT_REFS as u64;
        let mut cb = ino.chain()?;
        while rest >= NUM_CHAIN_REFS as u64 {
            rest -= NUM_CHAIN_REFS as u64;
            cb = self.chain(cb).next()?;
        }
        self.chain(cb).get(rest as usize)
    }
}
