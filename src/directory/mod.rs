//! Paged directory listing through the syscall bridge
//!
//! A [`DirStream`] owns one open directory handle. Entries are fetched a page
//! at a time (`BridgeOptions::dir_page_size` per `ReadDir` dispatch), so even
//! a huge directory never holds the scheduler thread for long and only one
//! page is buffered at once.
//!
//! # Module Organization
//!
//! - `DirEntry` / `EntryKind`: one listed name and its type hint
//! - `DirStream`: the paged handle used by the glob selector
//! - `DirIter`: `iterdir()` over an [`AsyncPath`](crate::path::AsyncPath)

use crate::bridge::{Syscall, SyscallBridge, Tracked};
use crate::error::{FsError, Result};
use crate::fs::Fs;
use crate::path::{AsyncPath, PurePath};
use futures::stream::Stream;
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fs::ReadDir;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Entry type as reported by the directory listing itself
///
/// Comes from `d_type` where the filesystem provides it, so no extra `stat`
/// is needed. Symlinks are reported as such and never followed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory
    Dir,
    /// Regular file or other non-directory, non-symlink type
    File,
    /// Symbolic link
    Symlink,
    /// The listing did not say
    Unknown,
}

impl EntryKind {
    fn from_file_type(file_type: Option<std::fs::FileType>) -> Self {
        match file_type {
            Some(t) if t.is_symlink() => Self::Symlink,
            Some(t) if t.is_dir() => Self::Dir,
            Some(_) => Self::File,
            None => Self::Unknown,
        }
    }
}

/// One name from a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: OsString,
    kind: EntryKind,
}

impl DirEntry {
    /// Entry name (basename only)
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// Type hint from the listing
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether the name starts with `.`
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.name.to_string_lossy().starts_with('.')
    }
}

/// An open directory read one page per dispatch
///
/// The handle is released as soon as the listing is exhausted, on error, or
/// when the stream is dropped.
pub struct DirStream {
    bridge: SyscallBridge,
    dir: PathBuf,
    handle: Option<Tracked<ReadDir>>,
    page_size: usize,
    done: bool,
}

impl DirStream {
    /// Open `dir` for listing
    ///
    /// # Errors
    ///
    /// Returns the classified `OpenDir` error (`NotFound`, `NotADirectory`,
    /// `PermissionDenied`, ...).
    pub async fn open(bridge: &SyscallBridge, dir: &Path) -> Result<Self> {
        let target = dir.to_path_buf();
        let handle = bridge
            .dispatch(Syscall::OpenDir, dir, move || std::fs::read_dir(&target))
            .await?;
        trace!("opened directory stream {}", dir.display());
        Ok(Self {
            bridge: bridge.clone(),
            dir: dir.to_path_buf(),
            handle: Some(bridge.track(handle)),
            page_size: bridge.options().dir_page_size(),
            done: false,
        })
    }

    /// The directory being listed
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether the handle is still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Fetch the next page; `None` once the listing is exhausted
    ///
    /// # Errors
    ///
    /// Returns the classified `ReadDir` error; the stream is finished
    /// afterwards. If an earlier call was abandoned mid-dispatch the handle
    /// went with it and this returns `Cancelled`.
    pub async fn next_page(&mut self) -> Result<Option<Vec<DirEntry>>> {
        if self.done {
            return Ok(None);
        }
        let Some(mut handle) = self.handle.take() else {
            self.done = true;
            return Err(FsError::Cancelled {
                call: Syscall::ReadDir,
                path: self.dir.clone(),
            });
        };

        let page_size = self.page_size;
        let (handle, page) = self
            .bridge
            .dispatch_once(Syscall::ReadDir, &self.dir, move || {
                let mut page = Vec::with_capacity(page_size);
                let mut failure = None;
                for entry in handle.by_ref().take(page_size) {
                    match entry {
                        Ok(entry) => page.push(DirEntry {
                            name: entry.file_name(),
                            kind: EntryKind::from_file_type(entry.file_type().ok()),
                        }),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                (handle, failure.map_or(Ok(page), Err))
            })
            .await?;

        let page = match page {
            Ok(page) => page,
            Err(err) => {
                self.done = true;
                drop(handle);
                return Err(FsError::from_io(Syscall::ReadDir, &self.dir, err));
            }
        };

        // A short page means the listing hit its end
        if page.len() < page_size {
            self.done = true;
            drop(handle);
            trace!("directory stream {} exhausted", self.dir.display());
        } else {
            self.handle = Some(handle);
        }
        Ok((!page.is_empty()).then_some(page))
    }

    /// Read every remaining entry, sorted by name
    ///
    /// # Errors
    ///
    /// Same as [`DirStream::next_page`].
    pub async fn read_sorted(mut self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(page) = self.next_page().await? {
            entries.extend(page);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            debug!("closing directory stream {} early", self.dir.display());
        }
    }
}

/// Buffered cursor over a directory, either streamed or fully sorted
pub(crate) struct Cursor {
    stream: Option<DirStream>,
    page: VecDeque<DirEntry>,
}

impl Cursor {
    pub(crate) async fn open(bridge: &SyscallBridge, dir: &Path, sorted: bool) -> Result<Self> {
        let stream = DirStream::open(bridge, dir).await?;
        if sorted {
            let entries = stream.read_sorted().await?;
            return Ok(Self {
                stream: None,
                page: entries.into(),
            });
        }
        Ok(Self {
            stream: Some(stream),
            page: VecDeque::new(),
        })
    }

    pub(crate) async fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        loop {
            if let Some(entry) = self.page.pop_front() {
                return Ok(Some(entry));
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            match stream.next_page().await {
                Ok(Some(page)) => self.page.extend(page),
                Ok(None) => {
                    self.stream = None;
                    return Ok(None);
                }
                Err(err) => {
                    self.stream = None;
                    return Err(err);
                }
            }
        }
    }
}

/// Children of a directory, in listing order, hidden entries included
pub struct DirIter {
    fs: Fs,
    parent: PurePath,
    cursor: Cursor,
}

impl DirIter {
    pub(crate) async fn open(fs: &Fs, parent: &PurePath) -> Result<Self> {
        let cursor = Cursor::open(fs.bridge(), parent.as_path(), false).await?;
        Ok(Self {
            fs: fs.clone(),
            parent: parent.clone(),
            cursor,
        })
    }

    /// Next child path; `None` when the listing is exhausted
    pub async fn next(&mut self) -> Option<Result<AsyncPath>> {
        match self.cursor.next_entry().await {
            Ok(Some(entry)) => Some(Ok(self.fs.bind(self.parent.child(entry.name())))),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }

    /// Adapt into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<AsyncPath>> {
        futures::stream::unfold(self, |mut iter| async move {
            iter.next().await.map(|item| (item, iter))
        })
    }

    /// Collect every child, stopping at the first error
    ///
    /// # Errors
    ///
    /// Returns the first listing error.
    pub async fn collect(mut self) -> Result<Vec<AsyncPath>> {
        let mut children = Vec::new();
        while let Some(child) = self.next().await {
            children.push(child?);
        }
        Ok(children)
    }
}
