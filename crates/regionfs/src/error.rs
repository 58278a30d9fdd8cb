//! Error kinds and their POSIX translation.

use strum::FromRepr;

/// Engine-level failure.
///
/// Engines either complete fully or leave the region unchanged; every
/// variant describes a refused operation, not a half-applied one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    EntryNotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("file or directory already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("resource busy")]
    Busy,
    #[error("no free inode slots")]
    StorageOutOfInodes,
    #[error("no free blocks")]
    StorageOutOfBlocks,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("permission denied")]
    PermissionDenied,
    #[error("region too small to hold a filesystem")]
    RegionTooSmall,
    #[error("region state is inconsistent")]
    Corrupted,
}

/// POSIX errno values the host driver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, thiserror::Error)]
#[repr(i32)]
pub enum Errno {
    /// EPERM
    #[error("operation not permitted")]
    Perm = 1,
    /// ENOENT
    #[error("no such file or directory")]
    NoEnt = 2,
    /// EACCES
    #[error("permission denied")]
    Access = 13,
    /// EFAULT
    #[error("bad address")]
    Fault = 14,
    /// EEXIST
    #[error("file exists")]
    Exist = 17,
    /// ENOTDIR
    #[error("not a directory")]
    NotDir = 20,
    /// EISDIR
    #[error("is a directory")]
    IsDir = 21,
    /// EINVAL
    #[error("invalid argument")]
    Inval = 22,
    /// ENOSPC
    #[error("no space left on device")]
    NoSpc = 28,
}

impl Errno {
    #[must_use]
    pub fn value(self) -> i32 {
        self as i32
    }
}

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        match err {
            FsError::EntryNotFound => Self::NoEnt,
            FsError::NotADirectory => Self::NotDir,
            FsError::IsADirectory => Self::IsDir,
            FsError::AlreadyExists | FsError::DirectoryNotEmpty | FsError::Busy => Self::Exist,
            FsError::StorageOutOfInodes | FsError::StorageOutOfBlocks => Self::NoSpc,
            FsError::NotPermitted => Self::Perm,
            FsError::InvalidArgument => Self::Inval,
            FsError::PermissionDenied => Self::Access,
            FsError::RegionTooSmall | FsError::Corrupted => Self::Fault,
        }
    }
}
