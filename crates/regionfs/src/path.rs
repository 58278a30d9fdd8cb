//! Absolute path resolution.
//!
//! Paths are `/`-separated and must be absolute. Empty components, as left
//! by doubled or trailing slashes, resolve like any other name a directory
//! does not contain, which rejects them.

use crate::{error::FsError, region::Filesystem, repr::NodeId};

/// Resolves `path` to its inode.
pub(crate) fn resolve(fs: &Filesystem, path: &str) -> Result<NodeId, FsError> {
    let rest = path.strip_prefix('/').ok_or(FsError::EntryNotFound)?;
    let mut node = NodeId::ROOT;
    if rest.is_empty() {
        return Ok(node);
    }
    for name in rest.split('/') {
        node = fs
            .dir_lookup(node, name)?
            .ok_or(FsError::EntryNotFound)?;
    }
    Ok(node)
}

/// Resolves `path` up to its final component.
///
/// Returns the parent directory's inode and the leaf name, borrowed from
/// `path`. The leaf is not looked up; it may not exist yet. A path with
/// no final component (`"/"`, or one ending in `/`) yields an empty leaf,
/// which every directory operation rejects.
pub(crate) fn resolve_parent<'p>(
    fs: &Filesystem,
    path: &'p str,
) -> Result<(NodeId, &'p str), FsError> {
    let rest = path.strip_prefix('/').ok_or(FsError::EntryNotFound)?;
    match rest.rfind('/') {
        Some(i) => {
            let mut node = NodeId::ROOT;
            for name in rest[..i].split('/') {
                node = fs
                    .dir_lookup(node, name)?
                    .ok_or(FsError::EntryNotFound)?;
            }
            Ok((node, &rest[i + 1..]))
        }
        None => Ok((NodeId::ROOT, rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::BLOCK_SIZE;

    #[test]
    fn resolves_nested_paths() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();
        fs.mknod("/a/b/f").unwrap();

        assert_eq!(resolve(&fs, "/"), Ok(NodeId::ROOT));
        let f = resolve(&fs, "/a/b/f").unwrap();
        let (parent, leaf) = resolve_parent(&fs, "/a/b/f").unwrap();
        assert_eq!(leaf, "f");
        assert_eq!(fs.dir_lookup(parent, "f").unwrap(), Some(f));
    }

    #[test]
    fn rejects_relative_and_missing() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        fs.mkdir("/a").unwrap();

        assert_eq!(resolve(&fs, "a"), Err(FsError::EntryNotFound));
        assert_eq!(resolve(&fs, ""), Err(FsError::EntryNotFound));
        assert_eq!(resolve(&fs, "/missing"), Err(FsError::EntryNotFound));
        assert_eq!(resolve(&fs, "//a"), Err(FsError::EntryNotFound));
        assert_eq!(resolve(&fs, "/a/"), Err(FsError::EntryNotFound));
    }

    #[test]
    fn file_as_intermediate_component() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        fs.mknod("/f").unwrap();

        assert_eq!(resolve(&fs, "/f/x"), Err(FsError::NotADirectory));
        assert_eq!(
            resolve(&fs, "/f/x/y").unwrap_err(),
            FsError::NotADirectory
        );
        // The parent walk stops one component early, so the leaf's parent
        // being a file only surfaces once it is used as a directory.
        let (parent, leaf) = resolve_parent(&fs, "/f/x").unwrap();
        assert_eq!(leaf, "x");
        assert_eq!(
            fs.dir_lookup(parent, "x").unwrap_err(),
            FsError::NotADirectory
        );
    }

    #[test]
    fn parent_of_root_path_is_empty_leaf() {
        let mut mem = vec![0; 64 * BLOCK_SIZE];
        let fs = Filesystem::mount(&mut mem).unwrap();
        let (parent, leaf) = resolve_parent(&fs, "/").unwrap();
        assert_eq!(parent, NodeId::ROOT);
        assert_eq!(leaf, "");
    }
}
