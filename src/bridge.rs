//! Syscall bridge: blocking filesystem calls off the scheduler thread
//!
//! compio drives one cooperative scheduler per thread. Most path operations
//! (stat, mkdir, readdir, rename, ...) have no io_uring opcode, so every one
//! of them is handed to compio's blocking pool through this bridge and the
//! calling task is resumed when the result is ready.
//!
//! # Architecture
//!
//! - `BridgeOptions` - configuration owned by this module (pool bound, retry policy)
//! - `SyscallBridge` - runtime dispatcher shared by every path bound to one `Fs`
//!
//! Each dispatch runs in a detached task that:
//!
//! 1. waits for the previous call on the same path to finish (path-bound calls only)
//! 2. acquires one of `max_in_flight` permits
//! 3. runs the closure with `spawn_blocking`, retrying transient exhaustion
//! 4. releases permit and lane, then reports through a oneshot channel
//!
//! A lane is a chain of completion tickets: every call takes the previous
//! call's receiver and leaves its own sender behind, so calls on one path
//! start strictly in issue order.
//!
//! Dropping the caller's future only drops the receiving end. The detached
//! task still finishes, so permits and lanes are never leaked, and anything
//! the closure returned (an open file, a directory stream) is dropped, and
//! thereby closed, in that task. This release is best effort: it happens
//! whenever the blocking call completes, not when the caller gives up.

use crate::error::{is_exhaustion, FsError, Result};
use crate::metadata::Metadata;
use compio_sync::Semaphore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// The closed set of operations the bridge dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syscall {
    /// `stat(2)`, following symlinks
    Stat,
    /// `lstat(2)`
    Lstat,
    /// `open(2)`
    Open,
    /// `close(2)`
    Close,
    /// `opendir(3)`
    OpenDir,
    /// One page of `readdir(3)`
    ReadDir,
    /// `mkdir(2)`
    Mkdir,
    /// `rmdir(2)`
    Rmdir,
    /// `unlink(2)`
    Unlink,
    /// `rename(2)`
    Rename,
    /// `symlink(2)`
    Symlink,
    /// `link(2)`
    Hardlink,
    /// `readlink(2)`
    ReadLink,
    /// `chmod(2)`
    Chmod,
    /// `utimensat(2)`
    Utime,
    /// `realpath(3)`
    RealPath,
    /// `read(2)` on an open session
    Read,
    /// `write(2)` on an open session
    Write,
    /// `lseek(2)` on an open session
    Seek,
    /// `ftruncate(2)` on an open session
    Truncate,
    /// `fsync(2)` on an open session
    Sync,
    /// `fstat(2)` on an open session
    Fstat,
    /// Environment and user database lookups (cwd, home, passwd, group)
    Lookup,
}

impl Syscall {
    /// Short lowercase name used in logs and error messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stat => "stat",
            Self::Lstat => "lstat",
            Self::Open => "open",
            Self::Close => "close",
            Self::OpenDir => "opendir",
            Self::ReadDir => "readdir",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
            Self::Unlink => "unlink",
            Self::Rename => "rename",
            Self::Symlink => "symlink",
            Self::Hardlink => "link",
            Self::ReadLink => "readlink",
            Self::Chmod => "chmod",
            Self::Utime => "utime",
            Self::RealPath => "realpath",
            Self::Read => "read",
            Self::Write => "write",
            Self::Seek => "seek",
            Self::Truncate => "truncate",
            Self::Sync => "fsync",
            Self::Fstat => "fstat",
            Self::Lookup => "lookup",
        }
    }

    /// Whether the call changes the entity at its path
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::Mkdir
                | Self::Rmdir
                | Self::Unlink
                | Self::Rename
                | Self::Symlink
                | Self::Hardlink
                | Self::Chmod
                | Self::Utime
                | Self::Write
                | Self::Truncate
        )
    }

    /// Whether the call operates on an already open handle rather than a path
    #[must_use]
    pub const fn is_handle_bound(self) -> bool {
        matches!(
            self,
            Self::Close
                | Self::ReadDir
                | Self::Read
                | Self::Write
                | Self::Seek
                | Self::Truncate
                | Self::Sync
                | Self::Fstat
        )
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Bridge configuration options
///
/// Uses `NonZeroUsize` to guarantee at compile-time that the pool bound and
/// the directory page size are >= 1.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Maximum number of blocking calls in flight at once
    max_in_flight: NonZeroUsize,
    /// Retries after a transient exhaustion error before giving up
    retry_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    retry_backoff: Duration,
    /// Directory entries fetched per `ReadDir` dispatch
    dir_page_size: NonZeroUsize,
}

impl BridgeOptions {
    /// Create options with the given pool bound and default retry policy
    ///
    /// `max_in_flight` is clamped to at least 1.
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: NonZeroUsize::new(max_in_flight).unwrap_or(NonZeroUsize::MIN),
            ..Self::default()
        }
    }

    /// Set the retry policy for transient exhaustion
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Set how many directory entries one `ReadDir` dispatch returns (clamped to >= 1)
    #[must_use]
    pub fn with_dir_page_size(mut self, entries: usize) -> Self {
        self.dir_page_size = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Maximum concurrent blocking calls
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight.get()
    }

    /// Retries after transient exhaustion
    #[must_use]
    pub const fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Initial retry backoff
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Entries per directory page
    #[must_use]
    pub const fn dir_page_size(&self) -> usize {
        self.dir_page_size.get()
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        let pool = std::cmp::max(2, num_cpus::get() * 4);
        Self {
            max_in_flight: NonZeroUsize::new(pool).unwrap_or(NonZeroUsize::MIN),
            retry_attempts: 4,
            retry_backoff: Duration::from_millis(5),
            dir_page_size: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

/// Dispatcher for blocking filesystem calls
///
/// Cheap to clone; clones share the permit pool, the lanes and the counters.
#[derive(Clone)]
pub struct SyscallBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    options: BridgeOptions,
    /// Bounds blocking calls in flight
    permits: Semaphore,
    /// Per-path FIFO admission; entries live only while a call on the path is queued
    lanes: DashMap<PathBuf, Lane>,
    dispatched: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    /// Directory streams and file sessions currently open
    open_handles: Arc<AtomicUsize>,
}

/// Tail of one path's admission chain
struct Lane {
    /// Fires when the most recently admitted call finishes
    tail: oneshot::Receiver<()>,
    /// Calls admitted and not yet finished
    queued: usize,
}

/// A place in a lane
struct Ticket {
    /// Completion of the call admitted just before this one
    prev: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl BridgeInner {
    /// Join the back of the lane for `key`
    ///
    /// Runs synchronously at issue time, so the order of tickets is the
    /// order in which callers first polled their dispatch.
    fn enter_lane(&self, key: &Path) -> Ticket {
        let (done, tail) = oneshot::channel();
        let prev = match self.lanes.entry(key.to_path_buf()) {
            Entry::Occupied(mut lane) => {
                let lane = lane.get_mut();
                lane.queued += 1;
                Some(std::mem::replace(&mut lane.tail, tail))
            }
            Entry::Vacant(slot) => {
                slot.insert(Lane { tail, queued: 1 });
                None
            }
        };
        Ticket { prev, done }
    }

    /// Let the next call on `key` start and drop the lane once it is idle
    fn leave_lane(&self, key: PathBuf, done: oneshot::Sender<()>) {
        // The successor may already be gone with its task; nothing to wake then
        let _ = done.send(());
        if let Entry::Occupied(mut lane) = self.lanes.entry(key) {
            let queued = &mut lane.get_mut().queued;
            *queued = queued.saturating_sub(1);
            if *queued == 0 {
                lane.remove();
            }
        }
    }

    /// One blocking call under a permit
    async fn run_blocking<T, F>(&self, f: F) -> std::thread::Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = self.permits.acquire().await;
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let outcome = compio::runtime::spawn_blocking(f).await;
        drop(permit);
        outcome
    }

    /// Run `f` until it succeeds, fails for good, or exhaustion retries run out
    async fn run_retried<T, F>(&self, call: Syscall, path: &Path, f: Arc<F>) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        let options = &self.options;
        let mut backoff = options.retry_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let op = Arc::clone(&f);
            match self.run_blocking(move || op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if is_exhaustion(&err) => {
                    if attempt > options.retry_attempts() {
                        self.exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "{call} {} still exhausted after {attempt} attempts: {err}",
                            path.display()
                        );
                        return Err(FsError::ResourceExhausted {
                            call,
                            path: path.to_path_buf(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{call} {} hit resource exhaustion ({err}), retrying in {backoff:?}",
                        path.display()
                    );
                    compio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Ok(Err(err)) => return Err(FsError::from_io(call, path, err)),
                Err(payload) => return Err(panicked(call, path, payload.as_ref())),
            }
        }
    }
}

impl fmt::Debug for SyscallBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyscallBridge")
            .field("options", &self.inner.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for SyscallBridge {
    fn default() -> Self {
        Self::new(BridgeOptions::default())
    }
}

impl SyscallBridge {
    /// Create a bridge from options
    #[must_use]
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                permits: Semaphore::new(options.max_in_flight()),
                options,
                lanes: DashMap::new(),
                dispatched: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                open_handles: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// The options this bridge was built with
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Snapshot of pool usage and counters
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        let max_in_flight = self.inner.options.max_in_flight();
        let available = self.inner.permits.available_permits();
        BridgeStats {
            max_in_flight,
            available,
            in_flight: max_in_flight.saturating_sub(available),
            queued_paths: self.inner.lanes.len(),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
            open_handles: self.inner.open_handles.load(Ordering::Relaxed),
        }
    }

    /// Count `handle` as open until it is dropped, wherever that happens
    pub(crate) fn track<T>(&self, handle: T) -> Tracked<T> {
        self.inner.open_handles.fetch_add(1, Ordering::Relaxed);
        Tracked {
            handle,
            guard: HandleGuard {
                counter: Arc::clone(&self.inner.open_handles),
            },
        }
    }

    /// Run a path-bound blocking call and classify its failure
    ///
    /// Calls on the same `path` start in issue order, including calls whose
    /// callers have already given up. Transient exhaustion (EMFILE, ENFILE,
    /// EAGAIN, ENOMEM) is retried with exponential backoff, which is why `f`
    /// must be callable more than once.
    ///
    /// # Errors
    ///
    /// Returns the classified [`FsError`] of the last attempt,
    /// `ResourceExhausted` once retries are spent, or `Cancelled` if the
    /// detached call vanished without reporting.
    pub async fn dispatch<T, F>(&self, call: Syscall, path: &Path, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = path.to_path_buf();
        let Ticket { prev, done } = inner.enter_lane(&key);
        let f = Arc::new(f);

        self.submit(call, path, async move {
            if let Some(prev) = prev {
                // Canceled only if the previous task was torn down with the runtime
                let _ = prev.await;
            }
            let result = inner.run_retried(call, &key, f).await;
            inner.leave_lane(key, done);
            result
        })
        .await
    }

    /// Run a handle-bound blocking call exactly once
    ///
    /// Used for calls that move an open handle into the closure and hand it
    /// back with the outcome; such calls are neither laned nor retried.
    pub(crate) async fn dispatch_once<T, F>(&self, call: Syscall, path: &Path, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        debug_assert!(call.is_handle_bound(), "{call} is not a handle operation");
        let inner = Arc::clone(&self.inner);
        let key = path.to_path_buf();
        self.submit(call, path, async move {
            inner
                .run_blocking(f)
                .await
                .map_err(|payload| panicked(call, &key, payload.as_ref()))
        })
        .await
    }

    /// `stat` or `lstat` a path
    ///
    /// # Errors
    ///
    /// Returns the classified error of the underlying call.
    pub async fn stat(&self, path: &Path, follow_symlinks: bool) -> Result<Metadata> {
        let target = path.to_path_buf();
        if follow_symlinks {
            self.dispatch(Syscall::Stat, path, move || {
                std::fs::metadata(&target).map(|m| Metadata::from_std(&m))
            })
            .await
        } else {
            self.dispatch(Syscall::Lstat, path, move || {
                std::fs::symlink_metadata(&target).map(|m| Metadata::from_std(&m))
            })
            .await
        }
    }

    /// Drive `work` in a detached task and wait for its report
    async fn submit<T, W>(&self, call: Syscall, path: &Path, work: W) -> Result<T>
    where
        T: 'static,
        W: Future<Output = Result<T>> + 'static,
    {
        let (tx, rx) = oneshot::channel();
        debug!("dispatch {call} {}", path.display());

        compio::runtime::spawn(async move {
            if tx.send(work.await).is_err() {
                trace!("{call} completed after its caller went away");
            }
        })
        .detach();

        match rx.await {
            Ok(result) => result,
            Err(oneshot::Canceled) => Err(FsError::Cancelled {
                call,
                path: path.to_path_buf(),
            }),
        }
    }
}

/// An open handle counted in [`BridgeStats::open_handles`]
///
/// The count drops with the guard, so a handle that is dropped inside an
/// abandoned blocking call is still accounted for.
#[derive(Debug)]
pub(crate) struct Tracked<T> {
    handle: T,
    guard: HandleGuard,
}

#[derive(Debug)]
pub(crate) struct HandleGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<T> Tracked<T> {
    /// Split into the raw handle and the guard that keeps it counted
    pub(crate) fn into_parts(self) -> (T, HandleGuard) {
        (self.handle, self.guard)
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}

/// A blocking call that panicked surfaces as an `Unknown` error
fn panicked(call: Syscall, path: &Path, payload: &(dyn Any + Send)) -> FsError {
    let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    };
    FsError::Unknown {
        call,
        path: path.to_path_buf(),
        code: None,
        source: io::Error::other(format!("blocking call panicked: {message}")),
    }
}

/// Snapshot of bridge usage
#[derive(Debug, Clone, Copy)]
pub struct BridgeStats {
    /// Configured pool bound
    pub max_in_flight: usize,
    /// Permits currently free
    pub available: usize,
    /// Calls currently holding a permit
    pub in_flight: usize,
    /// Paths with a call queued or running
    pub queued_paths: usize,
    /// Blocking calls started since creation (retries included)
    pub dispatched: u64,
    /// Retries after transient exhaustion
    pub retries: u64,
    /// Calls that surfaced `ResourceExhausted`
    pub exhausted: u64,
    /// Directory streams and file sessions not yet closed
    pub open_handles: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;
    use tempfile::TempDir;

    fn sleeper(ms: u64) -> impl Fn() -> io::Result<()> + Send + Sync + 'static {
        move || {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(())
        }
    }

    #[compio::test]
    async fn test_stat_existing_and_missing() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("data.bin");
        std::fs::write(&file, b"12345")?;

        let bridge = SyscallBridge::default();
        let meta = bridge.stat(&file, true).await?;
        assert_eq!(meta.size, 5);
        assert!(meta.is_file());

        let err = bridge
            .stat(&temp_dir.path().join("missing"), true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[compio::test]
    async fn test_distinct_paths_run_in_parallel() {
        let bridge = SyscallBridge::new(BridgeOptions::new(2));
        let start = Instant::now();
        let (a, b) = futures::join!(
            bridge.dispatch(Syscall::Stat, Path::new("/a"), sleeper(150)),
            bridge.dispatch(Syscall::Stat, Path::new("/b"), sleeper(150)),
        );
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() < Duration::from_millis(290));
    }

    #[compio::test]
    async fn test_single_permit_serializes() {
        let bridge = SyscallBridge::new(BridgeOptions::new(1));
        let start = Instant::now();
        let (a, b) = futures::join!(
            bridge.dispatch(Syscall::Stat, Path::new("/a"), sleeper(100)),
            bridge.dispatch(Syscall::Stat, Path::new("/b"), sleeper(100)),
        );
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[compio::test]
    async fn test_cancelled_caller_keeps_path_order() {
        let bridge = SyscallBridge::new(BridgeOptions::new(4));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let path = Path::new("/ordered");

        let first = {
            let log = Arc::clone(&log);
            bridge.dispatch(Syscall::Rename, path, move || {
                std::thread::sleep(Duration::from_millis(100));
                log.lock().unwrap().push("first");
                Ok(())
            })
        };
        // Give up on the first call while it is still running
        assert!(compio::time::timeout(Duration::from_millis(20), first)
            .await
            .is_err());

        let log2 = Arc::clone(&log);
        bridge
            .dispatch(Syscall::Unlink, path, move || {
                log2.lock().unwrap().push("second");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[compio::test]
    async fn test_several_abandoned_calls_stay_in_issue_order() {
        let bridge = SyscallBridge::new(BridgeOptions::new(4));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let path = Path::new("/fifo");
        let logged = |name: &'static str, ms: u64| {
            let log = Arc::clone(&log);
            move || {
                std::thread::sleep(Duration::from_millis(ms));
                log.lock().unwrap().push(name);
                Ok(())
            }
        };

        // Later calls are quicker, so any reordering would show in the log
        for (name, ms) in [("A", 60), ("B", 30), ("C", 10)] {
            let call = bridge.dispatch(Syscall::Rename, path, logged(name, ms));
            assert!(compio::time::timeout(Duration::from_millis(5), call)
                .await
                .is_err());
        }
        assert_eq!(bridge.stats().queued_paths, 1);

        bridge
            .dispatch(Syscall::Unlink, path, logged("D", 0))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "D"]);
        assert_eq!(bridge.stats().queued_paths, 0);
    }

    #[compio::test]
    async fn test_cancellation_releases_permit_and_lane() {
        let bridge = SyscallBridge::new(BridgeOptions::new(1));
        let slow = bridge.dispatch(Syscall::Stat, Path::new("/slow"), sleeper(80));
        assert!(compio::time::timeout(Duration::from_millis(10), slow)
            .await
            .is_err());

        // An unrelated call still completes once the abandoned one finishes
        bridge
            .dispatch(Syscall::Stat, Path::new("/next"), sleeper(1))
            .await
            .unwrap();

        let stats = bridge.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.queued_paths, 0);
    }

    #[compio::test]
    async fn test_exhaustion_is_retried_then_surfaced() {
        let bridge = SyscallBridge::new(
            BridgeOptions::new(2).with_retry(2, Duration::from_millis(1)),
        );
        let err = bridge
            .dispatch(Syscall::Open, Path::new("/busy"), || -> io::Result<()> {
                Err(io::Error::from_raw_os_error(libc::EMFILE))
            })
            .await
            .unwrap_err();

        match err {
            FsError::ResourceExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other:?}"),
        }
        let stats = bridge.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.exhausted, 1);
    }

    #[compio::test]
    async fn test_transient_exhaustion_recovers() {
        let bridge = SyscallBridge::new(
            BridgeOptions::new(2).with_retry(3, Duration::from_millis(1)),
        );
        let failures = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&failures);
        let value = bridge
            .dispatch(Syscall::Open, Path::new("/flaky"), move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io::Error::from_raw_os_error(libc::ENFILE))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(bridge.stats().retries, 2);
    }

    #[compio::test]
    async fn test_panicking_call_maps_to_unknown() {
        let bridge = SyscallBridge::default();
        let err = bridge
            .dispatch(Syscall::Stat, Path::new("/boom"), || -> io::Result<()> {
                panic!("boom")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Unknown { code: None, .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[compio::test]
    async fn test_tracked_handles_are_counted_until_dropped() {
        let bridge = SyscallBridge::default();
        let handle = bridge.track(7_u32);
        assert_eq!(*handle, 7);
        assert_eq!(bridge.stats().open_handles, 1);

        // Dropping inside a blocking call still releases the count
        bridge
            .dispatch_once(Syscall::Close, Path::new("/h"), move || drop(handle))
            .await
            .unwrap();
        assert_eq!(bridge.stats().open_handles, 0);

        let (raw, guard) = bridge.track(String::from("x")).into_parts();
        assert_eq!(raw, "x");
        assert_eq!(bridge.stats().open_handles, 1);
        drop(guard);
        assert_eq!(bridge.stats().open_handles, 0);
    }

    #[test]
    fn test_options_clamp_to_one() {
        let options = BridgeOptions::new(0).with_dir_page_size(0);
        assert_eq!(options.max_in_flight(), 1);
        assert_eq!(options.dir_page_size(), 1);
        assert!(BridgeOptions::default().max_in_flight() >= 2);
    }
}
