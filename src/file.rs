//! Scoped file handles driven through the syscall bridge
//!
//! A [`FileSession`] owns one open `std::fs::File`. Every operation moves the
//! file into a blocking call and gets it back with the outcome, so the
//! scheduler thread never blocks on file I/O.
//!
//! Sessions are closed exactly once: explicitly with [`FileSession::close`],
//! or on drop if the session was abandoned (error path, cancellation).
//!
//! [`Lines`] streams a session line by line without reading the whole file.

use crate::bridge::{Syscall, SyscallBridge, Tracked};
use crate::cache::MetadataCache;
use crate::error::{FsError, Result};
use crate::metadata::Metadata;
use futures::Stream;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Bytes fetched per read while splitting a file into lines
pub const LINE_CHUNK_SIZE: usize = 4096;

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Read only; the file must exist
    Read,
    /// Write only, created if missing and truncated if present
    Write,
    /// Write only at the end, created if missing
    Append,
    /// Read and write; the file must exist
    ReadWrite,
    /// Write only; fails with `AlreadyExists` if the file exists
    CreateNew,
}

impl OpenMode {
    /// Whether sessions in this mode can change the file
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::Read)
    }

    fn std_options(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::Write => options.write(true).create(true).truncate(true),
            Self::Append => options.append(true).create(true),
            Self::ReadWrite => options.read(true).write(true),
            Self::CreateNew => options.write(true).create_new(true),
        };
        options
    }
}

/// Open mode plus the permission bits for a newly created file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Access mode
    pub mode: OpenMode,
    /// Unix permission bits for a created file (before umask); defaults to 0o666
    pub permissions: Option<u32>,
}

impl OpenOptions {
    /// Options for `mode` with default permissions
    #[must_use]
    pub const fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            permissions: None,
        }
    }

    /// Set the permission bits used when the file is created
    #[must_use]
    pub const fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions);
        self
    }

    fn std_options(self) -> std::fs::OpenOptions {
        #[allow(unused_mut)]
        let mut options = self.mode.std_options();
        #[cfg(unix)]
        if let Some(permissions) = self.permissions {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(permissions);
        }
        options
    }
}

impl From<OpenMode> for OpenOptions {
    fn from(mode: OpenMode) -> Self {
        Self::new(mode)
    }
}

/// An open file whose operations are bridge dispatches
///
/// # Examples
///
/// ```rust,ignore
/// let mut session = fs.path("log.txt")?.open(OpenMode::Append).await?;
/// session.write_all(b"started\n").await?;
/// session.close().await?;
/// ```
pub struct FileSession {
    bridge: SyscallBridge,
    cache: MetadataCache,
    path: PathBuf,
    mode: OpenMode,
    /// `None` once closed, or if an abandoned call took the file with it
    file: Option<Tracked<File>>,
    dirty: bool,
}

impl FileSession {
    /// Open `path` through `bridge`
    ///
    /// # Errors
    ///
    /// Returns the classified `Open` error.
    pub(crate) async fn open(
        bridge: &SyscallBridge,
        cache: &MetadataCache,
        path: &Path,
        options: OpenOptions,
    ) -> Result<Self> {
        let target = path.to_path_buf();
        // Creation and truncation both change what stat reports
        let stale = options.mode.is_writable().then(|| cache.clone());
        let file = bridge
            .dispatch(Syscall::Open, path, move || {
                let file = options.std_options().open(&target);
                if let Some(cache) = &stale {
                    cache.invalidate(&target);
                }
                file
            })
            .await?;
        trace!("opened {} as {:?}", path.display(), options.mode);
        Ok(Self {
            bridge: bridge.clone(),
            cache: cache.clone(),
            path: path.to_path_buf(),
            mode: options.mode,
            file: Some(bridge.track(file)),
            dirty: false,
        })
    }

    /// Path the session was opened on
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the session was opened with
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether the file is still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Move the file into a blocking call and take it back afterwards
    async fn with_handle<T, F>(&mut self, call: Syscall, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut File) -> io::Result<T> + Send + 'static,
    {
        let Some(mut file) = self.file.take() else {
            return Err(FsError::Cancelled {
                call,
                path: self.path.clone(),
            });
        };
        let stale = call
            .is_mutating()
            .then(|| (self.cache.clone(), self.path.clone()));
        let (file, outcome) = self
            .bridge
            .dispatch_once(call, &self.path, move || {
                let outcome = op(&mut *file);
                if let Some((cache, path)) = &stale {
                    cache.invalidate(path);
                }
                (file, outcome)
            })
            .await?;
        self.file = Some(file);
        self.dirty |= call.is_mutating();
        outcome.map_err(|err| FsError::from_io(call, &self.path, err))
    }

    /// Read up to `len` bytes from the current position
    ///
    /// An empty result means end of file.
    ///
    /// # Errors
    ///
    /// Returns the classified `Read` error.
    pub async fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        self.with_handle(Syscall::Read, move |file| {
            let mut buf = vec![0; len];
            let read = file.read(&mut buf)?;
            buf.truncate(read);
            Ok(buf)
        })
        .await
    }

    /// Read from the current position to end of file
    ///
    /// # Errors
    ///
    /// Returns the classified `Read` error.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        self.with_handle(Syscall::Read, |file| {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
    }

    /// Write once, returning how many bytes were accepted
    ///
    /// # Errors
    ///
    /// Returns the classified `Write` error.
    pub async fn write(&mut self, data: impl Into<Vec<u8>>) -> Result<usize> {
        let data = data.into();
        self.with_handle(Syscall::Write, move |file| file.write(&data))
            .await
    }

    /// Write all of `data`
    ///
    /// # Errors
    ///
    /// Returns the classified `Write` error.
    pub async fn write_all(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        let data = data.into();
        self.with_handle(Syscall::Write, move |file| file.write_all(&data))
            .await
    }

    /// Move the file position
    ///
    /// # Errors
    ///
    /// Returns the classified `Seek` error.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.with_handle(Syscall::Seek, move |file| file.seek(pos))
            .await
    }

    /// Truncate or extend the file to `size` bytes
    ///
    /// # Errors
    ///
    /// Returns the classified `Truncate` error.
    pub async fn truncate(&mut self, size: u64) -> Result<()> {
        self.with_handle(Syscall::Truncate, move |file| file.set_len(size))
            .await
    }

    /// Flush data and metadata to stable storage
    ///
    /// # Errors
    ///
    /// Returns the classified `Sync` error.
    pub async fn sync_all(&mut self) -> Result<()> {
        self.with_handle(Syscall::Sync, |file| file.sync_all()).await
    }

    /// Metadata of the open file
    ///
    /// # Errors
    ///
    /// Returns the classified error of the underlying `fstat`.
    pub async fn metadata(&mut self) -> Result<Metadata> {
        self.with_handle(Syscall::Fstat, |file| {
            file.metadata().map(|m| Metadata::from_std(&m))
        })
        .await
    }

    /// Stream the rest of the file as lines, reading `chunk_size` bytes at a time
    #[must_use]
    pub fn lines(self, chunk_size: usize) -> Lines {
        Lines {
            session: self,
            chunk_size: chunk_size.max(1),
            pending: Vec::new(),
            scanned: 0,
            eof: false,
        }
    }

    /// Close the file, reporting any error from `close(2)`
    ///
    /// Closing a session that already lost its file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the classified `Close` error.
    pub async fn close(mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let (file, guard) = file.into_parts();
        let stale = (self.dirty || self.mode.is_writable())
            .then(|| (self.cache.clone(), self.path.clone()));
        let outcome = self
            .bridge
            .dispatch_once(Syscall::Close, &self.path, move || {
                let outcome = close_file(file);
                drop(guard);
                if let Some((cache, path)) = &stale {
                    cache.invalidate(path);
                }
                outcome
            })
            .await;
        trace!("closed {}", self.path.display());
        outcome?.map_err(|err| FsError::from_io(Syscall::Close, &self.path, err))
    }
}

#[cfg(unix)]
fn close_file(file: File) -> io::Result<()> {
    use std::os::fd::IntoRawFd;
    nix::unistd::close(file.into_raw_fd()).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn close_file(file: File) -> io::Result<()> {
    drop(file);
    Ok(())
}

impl Drop for FileSession {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            debug!("closing unclosed session on {}", self.path.display());
            drop(file);
            if self.mode.is_writable() {
                self.cache.invalidate(&self.path);
            }
        }
    }
}

/// Lines of an open file, read lazily
///
/// Each line keeps its `\n` terminator; the last one may have none.
/// Invalid UTF-8 is replaced with U+FFFD rather than failing the read.
pub struct Lines {
    session: FileSession,
    chunk_size: usize,
    /// Bytes read but not yet yielded
    pending: Vec<u8>,
    /// Prefix of `pending` known to hold no newline
    scanned: usize,
    eof: bool,
}

impl Lines {
    /// Next line, `None` at end of file
    ///
    /// A read error ends the sequence after it is yielded.
    pub async fn next(&mut self) -> Option<Result<String>> {
        loop {
            let unscanned = &self.pending[self.scanned..];
            if let Some(offset) = unscanned.iter().position(|&b| b == b'\n') {
                let end = self.scanned + offset;
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                self.scanned = 0;
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }
            self.scanned = self.pending.len();

            if self.eof {
                if self.pending.is_empty() {
                    return None;
                }
                self.scanned = 0;
                let rest = std::mem::take(&mut self.pending);
                return Some(Ok(String::from_utf8_lossy(&rest).into_owned()));
            }

            match self.session.read(self.chunk_size).await {
                Ok(chunk) if chunk.is_empty() => self.eof = true,
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(err) => {
                    self.eof = true;
                    self.pending.clear();
                    self.scanned = 0;
                    return Some(Err(err));
                }
            }
        }
    }

    /// Adapt into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> {
        futures::stream::unfold(self, |mut lines| async move {
            lines.next().await.map(|item| (item, lines))
        })
    }

    /// Collect every remaining line, stopping at the first error
    ///
    /// # Errors
    ///
    /// Returns the first `Read` error, or the `Close` error.
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line?);
        }
        self.close().await?;
        Ok(lines)
    }

    /// Close the underlying session
    ///
    /// # Errors
    ///
    /// Returns the classified `Close` error.
    pub async fn close(self) -> Result<()> {
        self.session.close().await
    }
}

impl std::fmt::Debug for Lines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lines")
            .field("session", &self.session)
            .field("chunk_size", &self.chunk_size)
            .field("pending", &self.pending.len())
            .field("eof", &self.eof)
            .finish()
    }
}

impl std::fmt::Debug for FileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish()
    }
}
