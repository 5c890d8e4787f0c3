//! Paths bound to a filesystem context
//!
//! [`AsyncPath`] is a [`PurePath`] plus the [`Fs`] it performs I/O through.
//! The I/O operations live in the [`FsOps`] capability; every one of them is
//! a bridge dispatch (or a cache hit for [`FsOps::cached_stat`]).
//!
//! Mutating operations invalidate the cache entries they affect inside the
//! blocking call, right after the syscall, so a later `stat` on the same
//! `Fs` never observes pre-mutation metadata, even when the caller stopped
//! waiting for the mutation.

use super::pure::{PureOps, PurePath};
use crate::bridge::Syscall;
use crate::cache::{CachePolicy, MetadataCache};
use crate::directory::DirIter;
use crate::error::{FsError, Result};
use crate::file::{FileSession, Lines, OpenMode, OpenOptions, LINE_CHUNK_SIZE};
use crate::fs::Fs;
use crate::glob::{Glob, GlobOptions, Pattern};
use crate::metadata::Metadata;
use futures::future::LocalBoxFuture;
use std::cmp::Ordering;
use std::ffi::OsString;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::ops::Div;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// A path bound to an [`Fs`]
///
/// Equality, hashing and ordering only consider the path, not the context.
#[derive(Clone)]
pub struct AsyncPath {
    pure: PurePath,
    fs: Fs,
}

impl AsyncPath {
    pub(crate) fn new(pure: PurePath, fs: Fs) -> Self {
        Self { pure, fs }
    }

    /// The rendered path
    #[must_use]
    pub fn as_path(&self) -> &Path {
        self.pure.as_path()
    }

    /// Owned copy of the rendered path
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        self.pure.to_path_buf()
    }

    /// Drop the context, keeping the path
    #[must_use]
    pub fn into_pure(self) -> PurePath {
        self.pure
    }
}

impl PartialEq for AsyncPath {
    fn eq(&self, other: &Self) -> bool {
        self.pure == other.pure
    }
}

impl Eq for AsyncPath {}

impl Hash for AsyncPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pure.hash(state);
    }
}

impl PartialOrd for AsyncPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AsyncPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pure.cmp(&other.pure)
    }
}

impl fmt::Debug for AsyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncPath({:?})", self.pure.as_path())
    }
}

impl fmt::Display for AsyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.pure, f)
    }
}

impl AsRef<Path> for AsyncPath {
    fn as_ref(&self) -> &Path {
        self.pure.as_path()
    }
}

impl Div<&PurePath> for &AsyncPath {
    type Output = AsyncPath;

    fn div(self, rhs: &PurePath) -> AsyncPath {
        PureOps::join(self, rhs)
    }
}

impl PureOps for AsyncPath {
    fn pure(&self) -> &PurePath {
        &self.pure
    }

    fn with_pure(&self, pure: PurePath) -> Self {
        Self {
            pure,
            fs: self.fs.clone(),
        }
    }
}

impl FsOps for AsyncPath {
    fn fs(&self) -> &Fs {
        &self.fs
    }
}

/// Options for [`FsOps::mkdir`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkdirOptions {
    /// Permission bits of the new directory (before umask)
    pub mode: u32,
    /// Create missing ancestors as well
    pub parents: bool,
    /// Succeed if the directory already exists
    pub exist_ok: bool,
}

impl Default for MkdirOptions {
    fn default() -> Self {
        Self {
            mode: 0o777,
            parents: false,
            exist_ok: false,
        }
    }
}

impl MkdirOptions {
    /// Defaults: mode 0o777, no parents, fail if present
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permission bits
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Create missing ancestors
    #[must_use]
    pub const fn parents(mut self, parents: bool) -> Self {
        self.parents = parents;
        self
    }

    /// Accept an existing directory
    #[must_use]
    pub const fn exist_ok(mut self, exist_ok: bool) -> Self {
        self.exist_ok = exist_ok;
        self
    }
}

/// Errors that mean "there is nothing usable at this path"
fn is_missing(err: &FsError) -> bool {
    err.is_not_found() || err.is_unresolvable() || matches!(err, FsError::NotADirectory { .. })
}

fn classify(result: Result<Metadata>, predicate: impl FnOnce(&Metadata) -> bool) -> Result<bool> {
    match result {
        Ok(metadata) => Ok(predicate(&metadata)),
        Err(err) if is_missing(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

fn create_dir(path: &Path, mode: u32, parents: bool) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    match builder.create(path) {
        Err(err) if parents && err.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::DirBuilder::new().recursive(true).create(parent)?;
            }
            builder.create(path)
        }
        other => other,
    }
}

fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        std::fs::Permissions::from_mode(mode)
    };
    #[cfg(not(unix))]
    let permissions = {
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o222 == 0);
        permissions
    };
    std::fs::set_permissions(path, permissions)
}

/// `chmod` that changes a symlink itself rather than its target
fn set_mode_nofollow(path: &Path, mode: u32) -> io::Result<()> {
    if !std::fs::symlink_metadata(path)?.file_type().is_symlink() {
        return set_mode(path, mode);
    }
    #[cfg(unix)]
    let result = {
        use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
        fchmodat(
            None,
            path,
            Mode::from_bits_truncate(mode as libc::mode_t),
            FchmodatFlags::NoFollowSymlink,
        )
        .map_err(io::Error::from)
    };
    #[cfg(not(unix))]
    let result = Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink permissions cannot be changed",
    ));
    result
}

fn resolve_path(path: &Path, strict: bool) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match std::fs::canonicalize(&absolute) {
        Ok(resolved) => Ok(resolved),
        Err(err) if strict || err.kind() != io::ErrorKind::NotFound => Err(err),
        Err(_) => {
            // Resolve the longest existing prefix, then append the rest
            let mut base = absolute.clone();
            let mut tail: Vec<OsString> = Vec::new();
            while let Some(last) = base.components().next_back() {
                match last {
                    Component::Normal(name) => tail.push(name.to_os_string()),
                    Component::ParentDir => tail.push(OsString::from("..")),
                    _ => break,
                }
                base.pop();
                if let Ok(mut resolved) = std::fs::canonicalize(&base) {
                    resolved.extend(tail.iter().rev());
                    return Ok(resolved);
                }
            }
            Ok(absolute)
        }
    }
}

/// Filesystem operations on a bound path
///
/// Every method is a suspension point. Implementors only provide the
/// context; everything else is built on [`PureOps`] and the bridge.
#[allow(async_fn_in_trait)]
pub trait FsOps: PureOps {
    /// The context I/O goes through
    fn fs(&self) -> &Fs;

    /// `stat` or `lstat` under an explicit cache policy
    ///
    /// # Errors
    ///
    /// Returns the classified `Stat`/`Lstat` error.
    async fn stat_with(&self, follow_symlinks: bool, policy: CachePolicy) -> Result<Metadata> {
        let fs = self.fs();
        fs.cache()
            .get(fs.bridge(), self.pure().as_path(), follow_symlinks, policy)
            .await
    }

    /// Fresh metadata, following symlinks
    ///
    /// # Errors
    ///
    /// Returns the classified `Stat` error.
    async fn stat(&self) -> Result<Metadata> {
        self.stat_with(true, CachePolicy::Refresh).await
    }

    /// Fresh metadata of the link itself
    ///
    /// # Errors
    ///
    /// Returns the classified `Lstat` error.
    async fn lstat(&self) -> Result<Metadata> {
        self.stat_with(false, CachePolicy::Refresh).await
    }

    /// Memoized metadata if present, otherwise a fresh `stat`
    ///
    /// # Errors
    ///
    /// Returns the classified `Stat` error on a miss.
    async fn cached_stat(&self) -> Result<Metadata> {
        self.stat_with(true, CachePolicy::Cached).await
    }

    /// Whether anything exists at this path (symlinks followed)
    ///
    /// # Errors
    ///
    /// Errors other than "not there" (for example `PermissionDenied`) are
    /// returned rather than reported as `false`.
    async fn exists(&self) -> Result<bool> {
        classify(self.stat().await, |_| true)
    }

    /// Whether this is a directory (symlinks followed)
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    async fn is_dir(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_dir)
    }

    /// Whether this is a regular file (symlinks followed)
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    async fn is_file(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_file)
    }

    /// Whether this is a symlink
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    async fn is_symlink(&self) -> Result<bool> {
        classify(self.lstat().await, Metadata::is_symlink)
    }

    /// Whether this is a named pipe
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    #[cfg(unix)]
    async fn is_fifo(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_fifo)
    }

    /// Whether this is a Unix domain socket
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    #[cfg(unix)]
    async fn is_socket(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_socket)
    }

    /// Whether this is a block device
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    #[cfg(unix)]
    async fn is_block_device(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_block_device)
    }

    /// Whether this is a character device
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    #[cfg(unix)]
    async fn is_char_device(&self) -> Result<bool> {
        classify(self.stat().await, Metadata::is_char_device)
    }

    /// Whether this directory is a mount point
    ///
    /// True when the parent lives on another device, or when parent and
    /// path are the same inode (the filesystem root).
    ///
    /// # Errors
    ///
    /// As for [`FsOps::exists`].
    async fn is_mount(&self) -> Result<bool> {
        let meta = match self.lstat().await {
            Ok(meta) => meta,
            Err(err) if is_missing(&err) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !meta.is_dir() {
            return Ok(false);
        }
        let parent = self.joinpath("..")?;
        let parent_meta = parent.lstat().await?;
        Ok(meta.dev != parent_meta.dev || meta.ino == parent_meta.ino)
    }

    /// Whether both paths name the same file
    ///
    /// Compares (device, inode) where the platform has them, otherwise the
    /// fully resolved paths.
    ///
    /// # Errors
    ///
    /// Returns the `Stat` error of either path.
    async fn samefile<P: FsOps>(&self, other: &P) -> Result<bool> {
        let mine = self.stat().await?;
        let theirs = other.stat().await?;
        match (mine.identity(), theirs.identity()) {
            (Some(mine), Some(theirs)) => Ok(mine == theirs),
            _ => Ok(self.resolve(true).await?.pure() == other.resolve(true).await?.pure()),
        }
    }

    /// Name of the owning user
    ///
    /// # Errors
    ///
    /// Returns the `Stat` error, or `NotFound` if the uid has no name.
    #[cfg(unix)]
    async fn owner(&self) -> Result<String> {
        let uid = self.stat().await?.uid;
        self.fs()
            .bridge()
            .dispatch(Syscall::Lookup, self.pure().as_path(), move || {
                nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
                    .map_err(io::Error::from)?
                    .map(|user| user.name)
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, format!("no user with uid {uid}"))
                    })
            })
            .await
    }

    /// Name of the owning group
    ///
    /// # Errors
    ///
    /// Returns the `Stat` error, or `NotFound` if the gid has no name.
    #[cfg(unix)]
    async fn group(&self) -> Result<String> {
        let gid = self.stat().await?.gid;
        self.fs()
            .bridge()
            .dispatch(Syscall::Lookup, self.pure().as_path(), move || {
                nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))
                    .map_err(io::Error::from)?
                    .map(|group| group.name)
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, format!("no group with gid {gid}"))
                    })
            })
            .await
    }

    /// This path made absolute against the working directory, without
    /// resolving symlinks or `..`
    ///
    /// # Errors
    ///
    /// Returns the `Lookup` error of reading the working directory.
    async fn absolute(&self) -> Result<Self> {
        if self.is_absolute() {
            return Ok(self.with_pure(self.pure().clone()));
        }
        let cwd = self.fs().cwd().await?;
        Ok(self.with_pure(cwd.pure().join(self.pure())))
    }

    /// Absolute path with symlinks resolved
    ///
    /// With `strict` every component must exist. Otherwise the longest
    /// existing prefix is resolved and the rest appended and normalized.
    ///
    /// # Errors
    ///
    /// Returns the classified `RealPath` error.
    async fn resolve(&self, strict: bool) -> Result<Self> {
        let target = self.pure().to_path_buf();
        let resolved = self
            .fs()
            .bridge()
            .dispatch(Syscall::RealPath, self.pure().as_path(), move || {
                resolve_path(&target, strict)
            })
            .await?;
        Ok(self.with_pure(PurePath::try_from(resolved)?.normalize()))
    }

    /// Expand a leading `~` or `~user`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the home directory cannot be determined.
    async fn expanduser(&self) -> Result<Self> {
        let unchanged = || self.with_pure(self.pure().clone());
        if self.has_root() || !self.drive().is_empty() {
            return Ok(unchanged());
        }
        let Some(first) = self.segments().first() else {
            return Ok(unchanged());
        };
        let first = first.to_string_lossy();
        let Some(user) = first.strip_prefix('~') else {
            return Ok(unchanged());
        };

        let home = if user.is_empty() {
            self.fs().home().await?
        } else {
            self.fs().user_home(user).await?
        };
        let rest = PurePath::from_parts(OsString::new(), false, self.segments()[1..].to_vec());
        Ok(self.with_pure(home.pure().join(&rest)))
    }

    /// Target of this symlink
    ///
    /// # Errors
    ///
    /// Returns the classified `ReadLink` error.
    async fn readlink(&self) -> Result<Self> {
        let target = self.pure().to_path_buf();
        let link = self
            .fs()
            .bridge()
            .dispatch(Syscall::ReadLink, self.pure().as_path(), move || {
                std::fs::read_link(&target)
            })
            .await?;
        Ok(self.with_pure(PurePath::try_from(link)?))
    }

    /// Create this directory
    ///
    /// # Errors
    ///
    /// Returns the classified `Mkdir` error; `AlreadyExists` is only
    /// suppressed with `exist_ok` when a directory is present.
    async fn mkdir(&self, options: MkdirOptions) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        let MkdirOptions {
            mode,
            parents,
            exist_ok,
        } = options;
        self.fs()
            .bridge()
            .dispatch(Syscall::Mkdir, self.pure().as_path(), move || {
                let result = create_dir(&target, mode, parents);
                stale.apply();
                match result {
                    Err(err)
                        if exist_ok
                            && err.kind() == io::ErrorKind::AlreadyExists
                            && target.is_dir() =>
                    {
                        Ok(())
                    }
                    other => other,
                }
            })
            .await
    }

    /// Remove this empty directory
    ///
    /// # Errors
    ///
    /// Returns the classified `Rmdir` error.
    async fn rmdir(&self) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::tree(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Rmdir, self.pure().as_path(), move || {
                stale.after(std::fs::remove_dir(&target))
            })
            .await
    }

    /// Remove this file or symlink
    ///
    /// # Errors
    ///
    /// Returns the classified `Unlink` error; `NotFound` is suppressed with
    /// `missing_ok`.
    async fn unlink(&self, missing_ok: bool) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        let result = self
            .fs()
            .bridge()
            .dispatch(Syscall::Unlink, self.pure().as_path(), move || {
                stale.after(std::fs::remove_file(&target))
            })
            .await;
        match result {
            Err(err) if missing_ok && err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Rename to `target`, replacing it if it is a file, and return it
    ///
    /// A relative `target` is taken relative to the working directory, not
    /// to this path.
    ///
    /// # Errors
    ///
    /// Returns the classified `Rename` error.
    async fn rename<P: PureOps>(&self, target: &P) -> Result<Self> {
        let from = self.pure().to_path_buf();
        let to = target.pure().to_path_buf();
        let stale = Stale::tree(self).and_tree(target.pure());
        self.fs()
            .bridge()
            .dispatch(Syscall::Rename, self.pure().as_path(), move || {
                stale.after(std::fs::rename(&from, &to))
            })
            .await?;
        Ok(self.with_pure(target.pure().clone()))
    }

    /// Same as [`FsOps::rename`]; both replace an existing target
    ///
    /// # Errors
    ///
    /// Returns the classified `Rename` error.
    async fn replace<P: PureOps>(&self, target: &P) -> Result<Self> {
        self.rename(target).await
    }

    /// Create the file if missing, otherwise update its timestamps
    ///
    /// # Errors
    ///
    /// Returns the classified `Utime` error; `AlreadyExists` when the file
    /// exists and `exist_ok` is false.
    async fn touch(&self, exist_ok: bool) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Utime, self.pure().as_path(), move || {
                if exist_ok {
                    let now = filetime::FileTime::now();
                    match filetime::set_file_times(&target, now, now) {
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        other => return stale.after(other),
                    }
                }
                stale.after(
                    std::fs::OpenOptions::new()
                        .write(true)
                        .create(true)
                        .create_new(!exist_ok)
                        .open(&target)
                        .map(drop),
                )
            })
            .await
    }

    /// Change permission bits
    ///
    /// Outside Unix only the write bits are honoured (read-only flag).
    ///
    /// # Errors
    ///
    /// Returns the classified `Chmod` error.
    async fn chmod(&self, mode: u32) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Chmod, self.pure().as_path(), move || {
                stale.after(set_mode(&target, mode))
            })
            .await
    }

    /// Change permission bits without following a final symlink
    ///
    /// Where the platform cannot change a symlink's own mode (Linux) a
    /// symlink fails with an `Unknown` error and its target is untouched.
    ///
    /// # Errors
    ///
    /// Returns the classified `Chmod` error.
    async fn lchmod(&self, mode: u32) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Chmod, self.pure().as_path(), move || {
                stale.after(set_mode_nofollow(&target, mode))
            })
            .await
    }

    /// Set access and modification times
    ///
    /// # Errors
    ///
    /// Returns the classified `Utime` error.
    async fn set_times(&self, accessed: SystemTime, modified: SystemTime) -> Result<()> {
        let target = self.pure().to_path_buf();
        let stale = Stale::entry(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Utime, self.pure().as_path(), move || {
                stale.after(filetime::set_file_times(
                    &target,
                    filetime::FileTime::from_system_time(accessed),
                    filetime::FileTime::from_system_time(modified),
                ))
            })
            .await
    }

    /// Make this path a symlink pointing at `target`
    ///
    /// `target_is_directory` only matters on Windows.
    ///
    /// # Errors
    ///
    /// Returns the classified `Symlink` error.
    async fn symlink_to<P: PureOps>(&self, target: &P, target_is_directory: bool) -> Result<()> {
        let link = self.pure().to_path_buf();
        let points_to = target.pure().to_path_buf();
        let stale = Stale::entry(self);
        self.fs()
            .bridge()
            .dispatch(Syscall::Symlink, self.pure().as_path(), move || {
                #[cfg(unix)]
                let result = {
                    let _ = target_is_directory;
                    std::os::unix::fs::symlink(&points_to, &link)
                };
                #[cfg(windows)]
                let result = if target_is_directory {
                    std::os::windows::fs::symlink_dir(&points_to, &link)
                } else {
                    std::os::windows::fs::symlink_file(&points_to, &link)
                };
                stale.after(result)
            })
            .await
    }

    /// Make this path a hard link to `target`
    ///
    /// # Errors
    ///
    /// Returns the classified `Hardlink` error.
    async fn hardlink_to<P: PureOps>(&self, target: &P) -> Result<()> {
        let link = self.pure().to_path_buf();
        let original = target.pure().to_path_buf();
        // The link count of the original changes too
        let stale = Stale::entry(self).and_entry(target.pure());
        self.fs()
            .bridge()
            .dispatch(Syscall::Hardlink, self.pure().as_path(), move || {
                stale.after(std::fs::hard_link(&original, &link))
            })
            .await
    }

    /// Open a session on this path
    ///
    /// # Errors
    ///
    /// Returns the classified `Open` error.
    async fn open(&self, options: impl Into<OpenOptions>) -> Result<FileSession> {
        let fs = self.fs();
        FileSession::open(fs.bridge(), fs.cache(), self.pure().as_path(), options.into()).await
    }

    /// Run `body` with an open session and close it whatever happens
    ///
    /// If `body` fails its error is returned and a close failure is only
    /// logged; if `body` succeeds a close failure is returned.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let len = path
    ///     .with_file(OpenMode::Read, |session| Box::pin(async move {
    ///         Ok(session.read_to_end().await?.len())
    ///     }))
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the `Open` error, the body's error, or the `Close` error.
    async fn with_file<T, F>(&self, options: impl Into<OpenOptions>, body: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut FileSession) -> LocalBoxFuture<'s, Result<T>>,
    {
        let mut session = self.open(options).await?;
        let outcome = body(&mut session).await;
        let closed = session.close().await;
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(
                    "closing {} after a failed operation also failed: {close_err}",
                    self.pure()
                );
                Err(err)
            }
        }
    }

    /// Whole file contents
    ///
    /// # Errors
    ///
    /// Returns the `Open`, `Read` or `Close` error.
    async fn read_bytes(&self) -> Result<Vec<u8>> {
        self.with_file(OpenMode::Read, |session| Box::pin(session.read_to_end()))
            .await
    }

    /// Whole file contents as UTF-8
    ///
    /// # Errors
    ///
    /// As for [`FsOps::read_bytes`]; invalid UTF-8 is an `Unknown` read error.
    async fn read_text(&self) -> Result<String> {
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes).map_err(|err| FsError::Unknown {
            call: Syscall::Read,
            path: self.pure().to_path_buf(),
            code: None,
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })
    }

    /// Lazily read the file line by line
    ///
    /// Lines keep their `\n`; invalid UTF-8 is replaced, not rejected.
    ///
    /// # Errors
    ///
    /// Returns the `Open` error; read errors arrive through the sequence.
    async fn read_lines(&self) -> Result<Lines> {
        Ok(self.open(OpenMode::Read).await?.lines(LINE_CHUNK_SIZE))
    }

    /// Replace the file contents, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns the `Open`, `Write` or `Close` error.
    async fn write_bytes(&self, data: impl Into<Vec<u8>>) -> Result<usize> {
        let data = data.into();
        let len = data.len();
        self.with_file(OpenMode::Write, move |session| Box::pin(session.write_all(data)))
            .await?;
        Ok(len)
    }

    /// Replace the file contents with `text`
    ///
    /// # Errors
    ///
    /// As for [`FsOps::write_bytes`].
    async fn write_text(&self, text: impl Into<String>) -> Result<usize> {
        self.write_bytes(text.into().into_bytes()).await
    }

    /// Lazily list the children of this directory
    ///
    /// # Errors
    ///
    /// Returns the classified `OpenDir` error.
    async fn iterdir(&self) -> Result<DirIter> {
        DirIter::open(self.fs(), self.pure()).await
    }

    /// Lazily select paths below this one matching `pattern`
    ///
    /// Nothing is dispatched until the first `next()`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if `pattern` does not compile.
    fn glob(&self, pattern: &str) -> Result<Glob> {
        self.glob_with(pattern, GlobOptions::default())
    }

    /// [`FsOps::glob`] with explicit options
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if `pattern` does not compile.
    fn glob_with(&self, pattern: &str, options: GlobOptions) -> Result<Glob> {
        let compiled = Pattern::new(pattern, options.effective_case_sensitive())?;
        Ok(Glob::new(
            self.fs().clone(),
            self.pure().clone(),
            compiled,
            options,
        ))
    }

    /// `glob("**/" + pattern)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if `pattern` does not compile.
    fn rglob(&self, pattern: &str) -> Result<Glob> {
        self.glob(&format!("**/{pattern}"))
    }
}

/// Memos a mutation makes stale
///
/// Moved into the blocking closure and applied there after the syscall, so
/// the cache is updated even if the caller stopped waiting. Applying twice
/// (a retried call) is harmless.
struct Stale {
    cache: MetadataCache,
    entries: Vec<PathBuf>,
    trees: Vec<PathBuf>,
}

impl Stale {
    /// A created, removed or modified entry, and its parent
    fn entry<P: FsOps>(path: &P) -> Self {
        Self {
            cache: path.fs().cache().clone(),
            entries: Vec::new(),
            trees: Vec::new(),
        }
        .and_entry(path.pure())
    }

    /// A moved or removed directory with everything below it, and its parent
    fn tree<P: FsOps>(path: &P) -> Self {
        Self {
            cache: path.fs().cache().clone(),
            entries: Vec::new(),
            trees: Vec::new(),
        }
        .and_tree(path.pure())
    }

    fn and_entry(mut self, path: &PurePath) -> Self {
        self.entries.push(path.to_path_buf());
        self.entries.push(path.parent().to_path_buf());
        self
    }

    fn and_tree(mut self, path: &PurePath) -> Self {
        self.trees.push(path.to_path_buf());
        self.entries.push(path.parent().to_path_buf());
        self
    }

    /// Invalidate, then hand back the syscall's result unchanged
    fn after<T>(&self, result: io::Result<T>) -> io::Result<T> {
        self.apply();
        result
    }

    fn apply(&self) {
        for tree in &self.trees {
            self.cache.invalidate_tree(tree);
        }
        for entry in &self.entries {
            self.cache.invalidate(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeOptions;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Fs, AsyncPath) {
        let temp_dir = TempDir::new().unwrap();
        let fs = Fs::new(BridgeOptions::new(4));
        let root = fs.path(temp_dir.path()).unwrap();
        (temp_dir, fs, root)
    }

    #[compio::test]
    async fn test_write_read_round_trip() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let file = root.joinpath("note.txt")?;
        assert_eq!(file.write_text("hello").await?, 5);
        assert_eq!(file.read_text().await?, "hello");
        assert!(file.is_file().await?);
        assert!(!file.is_dir().await?);
        assert_eq!(file.stat().await?.size, 5);
        Ok(())
    }

    #[compio::test]
    async fn test_queries_on_missing_path() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let missing = root.joinpath("nope/deeper")?;
        assert!(!missing.exists().await?);
        assert!(!missing.is_dir().await?);
        assert!(!missing.is_symlink().await?);
        assert!(missing.stat().await.unwrap_err().is_not_found());
        Ok(())
    }

    #[compio::test]
    async fn test_mkdir_options() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let nested = root.joinpath("a/b/c")?;

        let err = nested.mkdir(MkdirOptions::new()).await.unwrap_err();
        assert!(err.is_not_found());

        nested.mkdir(MkdirOptions::new().parents(true)).await?;
        assert!(nested.is_dir().await?);

        let err = nested
            .mkdir(MkdirOptions::new().parents(true))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
        nested.mkdir(MkdirOptions::new().exist_ok(true)).await?;

        // exist_ok does not cover a file in the way
        let file = root.joinpath("file")?;
        file.touch(true).await?;
        let err = file
            .mkdir(MkdirOptions::new().exist_ok(true))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
        Ok(())
    }

    #[compio::test]
    async fn test_unlink_and_rmdir() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let dir = root.joinpath("d")?;
        dir.mkdir(MkdirOptions::new()).await?;
        let file = dir.joinpath("f")?;
        file.write_bytes(b"x".to_vec()).await?;

        assert!(dir.rmdir().await.is_err());
        file.unlink(false).await?;
        assert!(file.unlink(false).await.unwrap_err().is_not_found());
        file.unlink(true).await?;
        dir.rmdir().await?;
        assert!(!dir.exists().await?);
        Ok(())
    }

    #[compio::test]
    async fn test_rename_moves_and_invalidates() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let src = root.joinpath("src.txt")?;
        let dst = root.joinpath("dst.txt")?;
        src.write_text("payload").await?;
        dst.write_text("old").await?;

        // Prime the cache for both paths
        assert_eq!(src.cached_stat().await?.size, 7);
        assert_eq!(dst.cached_stat().await?.size, 3);

        let moved = src.rename(&dst).await?;
        assert_eq!(moved, dst);
        assert!(!src.exists().await?);
        assert_eq!(dst.cached_stat().await?.size, 7);
        assert!(src.cached_stat().await.unwrap_err().is_not_found());
        Ok(())
    }

    #[compio::test]
    async fn test_touch() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let file = root.joinpath("t")?;
        file.touch(false).await?;
        assert!(file.is_file().await?);

        let err = file.touch(false).await.unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));

        let old = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        file.set_times(old, old).await?;
        assert_eq!(file.stat().await?.modified, old);
        file.touch(true).await?;
        assert!(file.stat().await?.modified > old);
        Ok(())
    }

    #[cfg(unix)]
    #[compio::test]
    async fn test_chmod() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let file = root.joinpath("m")?;
        file.touch(true).await?;
        file.chmod(0o640).await?;
        assert_eq!(file.cached_stat().await?.permissions(), 0o640);
        file.chmod(0o600).await?;
        // chmod invalidated the memo
        assert_eq!(file.cached_stat().await?.permissions(), 0o600);
        Ok(())
    }

    #[cfg(unix)]
    #[compio::test]
    async fn test_lchmod_leaves_symlink_target_alone() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let target = root.joinpath("target")?;
        target.touch(true).await?;
        target.chmod(0o644).await?;

        // A plain file is changed like chmod would
        target.lchmod(0o600).await?;
        assert_eq!(target.cached_stat().await?.permissions(), 0o600);

        let link = root.joinpath("link")?;
        link.symlink_to(&target, false).await?;
        // Linux refuses to change a symlink's own mode; others change the link
        if let Err(err) = link.lchmod(0o640).await {
            assert!(matches!(err, FsError::Unknown { .. }), "{err:?}");
        }
        assert_eq!(target.stat().await?.permissions(), 0o600);

        let err = root.joinpath("missing")?.lchmod(0o600).await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[cfg(unix)]
    #[compio::test]
    async fn test_links() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        let target = root.joinpath("target")?;
        target.write_text("data").await?;

        let soft = root.joinpath("soft")?;
        soft.symlink_to(&target, false).await?;
        assert!(soft.is_symlink().await?);
        assert!(soft.is_file().await?);
        assert_eq!(soft.readlink().await?, target);
        assert!(soft.samefile(&target).await?);

        let hard = root.joinpath("hard")?;
        hard.hardlink_to(&target).await?;
        assert!(!hard.is_symlink().await?);
        assert_eq!(target.stat().await?.nlink, 2);
        assert_eq!(hard.read_text().await?, "data");
        Ok(())
    }

    #[cfg(unix)]
    #[compio::test]
    async fn test_resolve() -> anyhow::Result<()> {
        let (temp_dir, fs, root) = setup();
        let real = root.joinpath("real")?;
        real.mkdir(MkdirOptions::new()).await?;
        let link = root.joinpath("link")?;
        link.symlink_to(&real, true).await?;

        let canonical = fs.path(std::fs::canonicalize(temp_dir.path())?)?;
        let resolved = link.resolve(true).await?;
        assert_eq!(resolved, canonical.joinpath("real")?);

        let missing = link.joinpath("not/there/../x")?;
        assert!(missing.resolve(true).await.is_err());
        let lenient = missing.resolve(false).await?;
        assert_eq!(lenient, canonical.joinpath("real/not/x")?);
        Ok(())
    }

    #[compio::test]
    async fn test_absolute_and_expanduser() -> anyhow::Result<()> {
        let fs = Fs::default();
        let relative = fs.path("some/file")?;
        let absolute = relative.absolute().await?;
        assert!(absolute.is_absolute());
        assert!(absolute.as_path().ends_with("some/file"));

        let plain = fs.path("no/tilde")?;
        assert_eq!(plain.expanduser().await?, plain);

        #[cfg(unix)]
        {
            let home = fs.home().await?;
            let expanded = fs.path("~/docs")?.expanduser().await?;
            assert_eq!(expanded, home.joinpath("docs")?);
        }
        Ok(())
    }

    #[cfg(unix)]
    #[compio::test]
    async fn test_owner_and_mount() -> anyhow::Result<()> {
        let (_temp_dir, fs, root) = setup();
        let file = root.joinpath("owned")?;
        file.touch(true).await?;
        let expected = nix::unistd::User::from_uid(nix::unistd::getuid())?
            .map(|user| user.name);
        if let Some(expected) = expected {
            assert_eq!(file.owner().await?, expected);
        }
        assert!(!file.group().await?.is_empty());

        assert!(fs.path("/")?.is_mount().await?);
        assert!(!file.is_mount().await?);
        Ok(())
    }

    #[compio::test]
    async fn test_with_file_body_error_still_closes() -> anyhow::Result<()> {
        let (_temp_dir, fs, root) = setup();
        let file = root.joinpath("session")?;

        let err = file
            .with_file(OpenMode::Write, |session| {
                Box::pin(async move {
                    session.write_all(b"partial".to_vec()).await?;
                    Err::<(), _>(FsError::malformed("x", "body failed"))
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::MalformedPath { .. }));
        assert_eq!(fs.bridge().stats().open_handles, 0);
        assert_eq!(file.read_text().await?, "partial");
        Ok(())
    }

    #[compio::test]
    async fn test_iterdir_lists_hidden_entries() -> anyhow::Result<()> {
        let (_temp_dir, _fs, root) = setup();
        for name in ["a", ".hidden", "b"] {
            root.joinpath(name)?.touch(true).await?;
        }
        let mut names: Vec<_> = root
            .iterdir()
            .await?
            .collect()
            .await?
            .into_iter()
            .filter_map(|p| p.name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        assert_eq!(names, vec![".hidden", "a", "b"]);
        Ok(())
    }
}
