//! File metadata snapshots
//!
//! [`Metadata`] is a plain, `Clone`-able copy of the fields of a `stat(2)`
//! result. It is what the bridge hands back from `Stat`/`Lstat` and what the
//! [`MetadataCache`](crate::cache::MetadataCache) stores.

use std::time::SystemTime;

/// File metadata captured from a single `stat`/`lstat` call
///
/// # Fields
///
/// - `size`, `mode`, `uid`, `gid`, `nlink`, `ino`, `dev`: Standard Unix metadata
/// - `accessed`, `modified`: Timestamps (nanosecond precision where the platform has it)
/// - `created`: Birth time when available
///
/// On non-Unix platforms the ownership and inode fields are zero and
/// [`Metadata::identity`] is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// File size in bytes
    pub size: u64,
    /// File mode (type + permissions)
    pub mode: u32,
    /// User ID of owner
    pub uid: u32,
    /// Group ID of owner
    pub gid: u32,
    /// Number of hard links
    pub nlink: u64,
    /// Inode number
    pub ino: u64,
    /// Device ID
    pub dev: u64,
    /// Last access time
    pub accessed: SystemTime,
    /// Last modification time
    pub modified: SystemTime,
    /// Creation time (birth time) if available
    pub created: Option<SystemTime>,
}

const S_IFMT: u32 = libc::S_IFMT as u32;

impl Metadata {
    /// Create `Metadata` from standard Rust metadata
    #[cfg(unix)]
    #[must_use]
    pub fn from_std(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            nlink: metadata.nlink(),
            ino: metadata.ino(),
            dev: metadata.dev(),
            accessed: metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            created: metadata.created().ok(),
        }
    }

    /// Create `Metadata` from standard Rust metadata
    ///
    /// Without Unix extensions only the file type bits are synthesized.
    #[cfg(not(unix))]
    #[must_use]
    pub fn from_std(metadata: &std::fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            libc::S_IFLNK
        } else if file_type.is_dir() {
            libc::S_IFDIR
        } else {
            libc::S_IFREG
        };
        let write = if metadata.permissions().readonly() { 0 } else { 0o222 };

        Self {
            size: metadata.len(),
            mode: kind as u32 | 0o444 | write,
            uid: 0,
            gid: 0,
            nlink: 1,
            ino: 0,
            dev: 0,
            accessed: metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            created: metadata.created().ok(),
        }
    }

    fn file_type_bits(&self) -> u32 {
        self.mode & S_IFMT
    }

    /// Check if this is a regular file
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.file_type_bits() == libc::S_IFREG as u32
    }

    /// Check if this is a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == libc::S_IFDIR as u32
    }

    /// Check if this is a symlink (only possible for `lstat` results)
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == libc::S_IFLNK as u32
    }

    /// Check if this is a named pipe
    #[cfg(unix)]
    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.file_type_bits() == libc::S_IFIFO as u32
    }

    /// Check if this is a Unix domain socket
    #[cfg(unix)]
    #[must_use]
    pub fn is_socket(&self) -> bool {
        self.file_type_bits() == libc::S_IFSOCK as u32
    }

    /// Check if this is a block device
    #[cfg(unix)]
    #[must_use]
    pub fn is_block_device(&self) -> bool {
        self.file_type_bits() == libc::S_IFBLK as u32
    }

    /// Check if this is a character device
    #[cfg(unix)]
    #[must_use]
    pub fn is_char_device(&self) -> bool {
        self.file_type_bits() == libc::S_IFCHR as u32
    }

    /// Get file permissions (mode & 0o7777)
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// (device, inode) pair identifying the underlying file
    ///
    /// `None` where the platform reports no inode numbers.
    #[must_use]
    pub const fn identity(&self) -> Option<(u64, u64)> {
        if self.dev == 0 && self.ino == 0 {
            None
        } else {
            Some((self.dev, self.ino))
        }
    }
}
