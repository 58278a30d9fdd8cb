//! The POSIX-facing operation surface.
//!
//! Thin adapters over the engines: resolve the path, act, refresh
//! timestamps. Reads refresh atime, data and structural writes refresh
//! mtime, creation stamps all three. The errno a host driver should
//! report is `Errno::from(err)`.

use crate::{
    error::FsError,
    node::{self, Cursor},
    path,
    region::Filesystem,
    repr::{BLOCK_SIZE, Inode, T_DIR, T_FILE, TimeSpec},
    stat::{FsStat, Metadata},
};

use dataview::PodMethods as _;

impl Filesystem<'_> {
    /// Reports the attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<Metadata, FsError> {
        let node = path::resolve(self, path)?;
        Ok(Metadata::from_inode(&self.node(node)))
    }

    /// Lists the names in the directory at `path`, in directory order.
    ///
    /// `.` and `..` are never stored, so they are never listed.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>, FsError> {
        let dir = path::resolve(self, path)?;
        let ino = self.node(dir);
        if !ino.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.touch_atime(dir, node::now());

        let mut names = Vec::with_capacity(ino.size as usize);
        let Some(mut cur) = Cursor::load(self, dir) else {
            return Ok(names);
        };
        while let Some((dblk, entry)) = cur.pos() {
            let de = self.dir_entry(dblk, entry);
            if de.node().is_none() {
                break;
            }
            names.push(String::from_utf8_lossy(de.name()).into_owned());
            cur.seek(self, 1);
        }
        Ok(names)
    }

    /// Creates a regular file at `path`.
    pub fn mknod(&mut self, path: &str) -> Result<(), FsError> {
        self.create(path, T_FILE)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        self.create(path, T_DIR)
    }

    fn create(&mut self, path: &str, mode: u64) -> Result<(), FsError> {
        let (parent, leaf) = path::resolve_parent(self, path)?;
        let node = self.alloc_node().ok_or(FsError::StorageOutOfInodes)?;

        let now = node::now();
        let mut ino = Inode::zeroed();
        ino.allocate(mode);
        ino.atime = now;
        ino.mtime = now;
        ino.ctime = now;
        self.put_node(node, &ino);

        if let Err(err) = self.dir_insert(parent, leaf, node) {
            self.clear_node(node);
            return Err(err);
        }
        self.touch_mtime(parent, now);
        Ok(())
    }

    /// Removes the file at `path`, releasing its data once the last link
    /// is gone.
    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, leaf) = path::resolve_parent(self, path)?;
        let target = self
            .dir_lookup(parent, leaf)?
            .ok_or(FsError::EntryNotFound)?;
        if self.node(target).is_dir() {
            return Err(FsError::Busy);
        }

        let node = self.dir_remove(parent, leaf)?;
        self.touch_mtime(parent, node::now());
        if self.node(node).nlinks == 0 {
            self.resize(node, 0)?;
            self.clear_node(node);
        }
        Ok(())
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, leaf) = path::resolve_parent(self, path)?;
        let target = self
            .dir_lookup(parent, leaf)?
            .ok_or(FsError::EntryNotFound)?;
        if !self.node(target).is_dir() {
            return Err(FsError::NotADirectory);
        }

        let node = self.dir_remove(parent, leaf)?;
        self.touch_mtime(parent, node::now());
        if self.node(node).nlinks == 0 {
            // An empty directory owns no blocks.
            self.clear_node(node);
        }
        Ok(())
    }

    /// Moves `from` to `to`.
    ///
    /// Within one parent this is an in-place rename. Across parents the
    /// entry is inserted at the destination and then removed at the
    /// source; if that removal fails, the insertion is rolled back.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        // Moving a directory into its own subtree would orphan a cycle.
        if to.len() > from.len() && to.starts_with(from) && to.as_bytes()[from.len()] == b'/' {
            return Err(FsError::InvalidArgument);
        }
        let (pfrom, ffrom) = path::resolve_parent(self, from)?;
        let (pto, fto) = path::resolve_parent(self, to)?;
        let file = self
            .dir_lookup(pfrom, ffrom)?
            .ok_or(FsError::EntryNotFound)?;

        let now = node::now();
        self.touch_mtime(file, now);

        if pfrom == pto {
            self.dir_rename(pfrom, ffrom, fto)?;
            self.touch_mtime(pfrom, now);
            return Ok(());
        }

        self.dir_insert(pto, fto, file)?;
        if self.dir_remove(pfrom, ffrom).is_err() {
            let _ = self.dir_remove(pto, fto);
            return Err(FsError::PermissionDenied);
        }
        self.touch_mtime(pfrom, now);
        self.touch_mtime(pto, now);
        Ok(())
    }

    /// Sets the file at `path` to `len` bytes, zero-filling growth.
    pub fn truncate(&mut self, path: &str, len: u64) -> Result<(), FsError> {
        let node = path::resolve(self, path)?;
        if !self.node(node).is_file() {
            return Err(FsError::IsADirectory);
        }
        self.touch_mtime(node, node::now());
        self.resize(node, len).map_err(|err| match err {
            FsError::StorageOutOfBlocks => FsError::NotPermitted,
            other => other,
        })
    }

    /// Checks that `path` exists, refreshing its atime.
    pub fn open(&mut self, path: &str) -> Result<(), FsError> {
        let node = path::resolve(self, path)?;
        self.touch_atime(node, node::now());
        Ok(())
    }

    /// Reads from the file at `path` into `buf`, starting at byte `off`.
    ///
    /// Returns the bytes read; zero means end of file.
    pub fn read(&mut self, path: &str, buf: &mut [u8], off: u64) -> Result<usize, FsError> {
        let node = path::resolve(self, path)?;
        if !self.node(node).is_file() {
            return Err(FsError::IsADirectory);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.touch_atime(node, node::now());
        Ok(self.read_file_at(node, buf, off))
    }

    /// Writes `buf` to the file at `path` at byte `off`, growing the file
    /// as needed; a write past the end makes the gap explicit zeros.
    ///
    /// Returns the bytes written, which may fall short when the region
    /// fills up mid-write.
    pub fn write(&mut self, path: &str, buf: &[u8], off: u64) -> Result<usize, FsError> {
        let node = path::resolve(self, path)?;
        if !self.node(node).is_file() {
            return Err(FsError::IsADirectory);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.touch_mtime(node, node::now());

        let size = self.node(node).size;
        if off >= size {
            // Reach the write's first block up front so a hole left
            // behind `off` is zero-filled in one step.
            let boundary = off.next_multiple_of(BLOCK_SIZE as u64);
            let target = u64::min(boundary, off + buf.len() as u64);
            self.resize(node, target).map_err(|err| match err {
                FsError::StorageOutOfBlocks => FsError::InvalidArgument,
                other => other,
            })?;
        }
        Ok(self.write_file_at(node, buf, off))
    }

    /// Sets the access and modification times of `path`.
    pub fn utimens(&mut self, path: &str, atime: TimeSpec, mtime: TimeSpec) -> Result<(), FsError> {
        let node = path::resolve(self, path)?;
        let mut ino = self.node(node);
        ino.atime = atime;
        ino.mtime = mtime;
        self.put_node(node, &ino);
        Ok(())
    }

    /// Reports filesystem-wide usage.
    pub fn statfs(&self) -> FsStat {
        let header = self.header();
        FsStat::new(header.size, header.free)
    }
}
