//! Resumable glob traversal
//!
//! The selector is an explicit state machine over a stack of frames rather
//! than a recursive generator. Each frame is one pending unit of work; the
//! frame on top is only popped once its work is done, so abandoning a
//! `next()` call part way leaves the traversal position intact.
//!
//! Traversal is depth-first. A listing frame pushes at most one child frame
//! above itself before yielding control, so memory stays proportional to the
//! tree depth times the directory page size.

use super::pattern::{NamePattern, Pattern, Segment};
use super::GlobOptions;
use crate::bridge::{Syscall, SyscallBridge};
use crate::directory::{Cursor, DirEntry, EntryKind};
use crate::error::{FsError, Result};
use crate::fs::Fs;
use crate::path::{AsyncPath, PurePath};
use futures::stream::Stream;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

enum Frame {
    /// Apply segments `index..` to `path`, known to exist (and to be a
    /// directory unless `index` is past the last segment)
    Enter { path: PurePath, index: usize },
    /// Check that `path` exists (and is a directory if `need_dir`) first
    Check {
        path: PurePath,
        index: usize,
        need_dir: bool,
    },
    /// List `dir`, matching names against the wildcard at `index`
    Scan {
        dir: PurePath,
        index: usize,
        cursor: Option<Cursor>,
    },
    /// List `dir` for subdirectories to feed back into the `**` at `index`
    Descend {
        dir: PurePath,
        index: usize,
        cursor: Option<Cursor>,
    },
}

/// What the top frame decided
enum Step {
    /// Replace the top frame with these, last one on top
    Replace(Vec<Frame>),
    /// Keep the top frame and push this one above it
    Push(Frame),
    /// Nothing new from the top frame yet; run it again
    Again,
    /// Top frame reached the end of the pattern
    Matched(PurePath),
    /// Top frame failed
    Failed(FsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Finished,
    Cancelled,
}

/// What makes a directory "already expanded"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DirKey {
    Inode(u64, u64),
    Resolved(PathBuf),
}

/// Identity of `dir` after following symlinks
async fn dir_key(bridge: &SyscallBridge, dir: &PurePath) -> Result<DirKey> {
    if let Some((dev, ino)) = bridge.stat(dir.as_path(), true).await?.identity() {
        return Ok(DirKey::Inode(dev, ino));
    }
    let target = dir.to_path_buf();
    bridge
        .dispatch(Syscall::RealPath, dir.as_path(), move || {
            std::fs::canonicalize(&target)
        })
        .await
        .map(DirKey::Resolved)
}

/// Lazy sequence of paths matching a glob pattern
///
/// Matches are produced in depth-first order as the tree is walked. The
/// order within a directory is the raw listing order unless
/// [`GlobOptions::sorted`] is set.
///
/// Every yielded path is distinct: `**` segments track the (device, inode)
/// of each directory they expand (its resolved path where the platform has
/// no inode numbers), so symlink cycles are entered once, and patterns with
/// several `**` remember what they already yielded.
pub struct Glob {
    fs: Fs,
    pattern: Arc<Pattern>,
    options: GlobOptions,
    stack: Vec<Frame>,
    visited: HashSet<(usize, DirKey)>,
    yielded: Option<HashSet<PurePath>>,
    state: State,
    matched: u64,
}

impl Glob {
    pub(crate) fn new(fs: Fs, root: PurePath, pattern: Pattern, options: GlobOptions) -> Self {
        debug!("glob {:?} under {root}", pattern.as_str());
        let yielded = (pattern.recursive_segments() > 1).then(HashSet::new);
        Self {
            fs,
            pattern: Arc::new(pattern),
            options,
            // A start path that is not a directory yields nothing
            stack: vec![Frame::Check {
                path: root,
                index: 0,
                need_dir: true,
            }],
            visited: HashSet::new(),
            yielded,
            state: State::Running,
            matched: 0,
        }
    }

    /// The compiled pattern
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Number of matches yielded so far
    #[must_use]
    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Whether the sequence has ended (exhausted, failed or cancelled)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state != State::Running
    }

    /// Stop the traversal and release every open directory stream
    ///
    /// Later calls to [`Glob::next`] return `None`.
    pub fn cancel(&mut self) {
        if self.state == State::Running {
            debug!(
                "glob {:?} cancelled after {} matches",
                self.pattern.as_str(),
                self.matched
            );
        }
        self.stack.clear();
        self.state = State::Cancelled;
    }

    fn finish(&mut self) {
        self.stack.clear();
        if self.state == State::Running {
            self.state = State::Finished;
        }
    }

    /// Advance to the next match
    ///
    /// Returns `None` once the traversal is exhausted or cancelled. An
    /// `Err` item is either a branch failure in strict mode (the walk goes
    /// on) or an unrecoverable failure (the walk ends after it).
    pub async fn next(&mut self) -> Option<Result<AsyncPath>> {
        loop {
            if self.state != State::Running {
                return None;
            }
            let step = match self.step().await {
                Some(step) => step,
                None => {
                    trace!("glob {:?} exhausted", self.pattern.as_str());
                    self.finish();
                    return None;
                }
            };

            match step {
                Step::Replace(frames) => {
                    self.stack.pop();
                    self.stack.extend(frames);
                }
                Step::Push(frame) => self.stack.push(frame),
                Step::Again => {}
                Step::Matched(path) => {
                    self.stack.pop();
                    if let Some(yielded) = self.yielded.as_mut() {
                        if !yielded.insert(path.clone()) {
                            continue;
                        }
                    }
                    self.matched += 1;
                    return Some(Ok(self.fs.bind(path)));
                }
                Step::Failed(err) => {
                    self.stack.pop();
                    if let Some(item) = self.on_branch_error(err) {
                        return Some(item);
                    }
                }
            }
        }
    }

    /// Decide what the top frame does next; `None` when the stack is empty
    async fn step(&mut self) -> Option<Step> {
        let pattern = Arc::clone(&self.pattern);
        let sorted = self.options.sorted;
        let bridge = self.fs.bridge().clone();

        let step = match self.stack.last_mut()? {
            Frame::Enter { path, index } => {
                let index = *index;
                match pattern.segments().get(index) {
                    None => Step::Matched(path.clone()),
                    Some(Segment::Literal(name)) => Step::Replace(vec![Frame::Check {
                        path: path.child(name),
                        index: index + 1,
                        need_dir: index + 1 < pattern.len(),
                    }]),
                    Some(Segment::Wildcard(_)) => Step::Replace(vec![Frame::Scan {
                        dir: path.clone(),
                        index,
                        cursor: None,
                    }]),
                    Some(Segment::Recursive) => {
                        let dir = path.clone();
                        match dir_key(&bridge, &dir).await {
                            Ok(key) => {
                                if self.visited.insert((index, key)) {
                                    // Zero directories first, then one or more
                                    Step::Replace(vec![
                                        Frame::Descend {
                                            dir: dir.clone(),
                                            index,
                                            cursor: None,
                                        },
                                        Frame::Enter {
                                            path: dir,
                                            index: index + 1,
                                        },
                                    ])
                                } else {
                                    trace!("{dir} already expanded, skipping cycle");
                                    Step::Replace(Vec::new())
                                }
                            }
                            Err(err) => Step::Failed(err),
                        }
                    }
                }
            }

            Frame::Check {
                path,
                index,
                need_dir,
            } => match bridge.stat(path.as_path(), true).await {
                Ok(meta) if !*need_dir || meta.is_dir() => Step::Replace(vec![Frame::Enter {
                    path: path.clone(),
                    index: *index,
                }]),
                Ok(_) => Step::Replace(Vec::new()),
                Err(err) => Step::Failed(err),
            },

            Frame::Scan { dir, index, cursor } => {
                let Some(Segment::Wildcard(segment)) = pattern.segments().get(*index) else {
                    return Some(Step::Replace(Vec::new()));
                };
                match advance(&bridge, dir, cursor, sorted).await {
                    Ok(Some(entry)) => {
                        let last = *index + 1 == pattern.len();
                        scan_entry(dir, *index, segment, &entry, last)
                            .map_or(Step::Again, Step::Push)
                    }
                    Ok(None) => Step::Replace(Vec::new()),
                    Err(err) => Step::Failed(err),
                }
            }

            Frame::Descend { dir, index, cursor } => match advance(&bridge, dir, cursor, sorted).await
            {
                Ok(Some(entry)) => descend_entry(dir, *index, &entry).map_or(Step::Again, Step::Push),
                Ok(None) => Step::Replace(Vec::new()),
                Err(err) => Step::Failed(err),
            },
        };
        Some(step)
    }

    fn on_branch_error(&mut self, err: FsError) -> Option<Result<AsyncPath>> {
        if err.is_not_found() {
            // Vanished between listing and probing
            trace!("skipping vanished branch: {err}");
            return None;
        }
        if err.is_unresolvable() {
            // Dangling or looping symlink: nothing to match below it
            trace!("skipping unresolvable branch: {err}");
            return None;
        }
        if err.is_branch_recoverable() {
            if self.options.strict {
                return Some(Err(err));
            }
            debug!("skipping unreadable branch: {err}");
            return None;
        }
        debug!("glob {:?} aborted: {err}", self.pattern.as_str());
        self.finish();
        Some(Err(err))
    }

    /// Adapt into a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<AsyncPath>> {
        futures::stream::unfold(self, |mut glob| async move {
            glob.next().await.map(|item| (item, glob))
        })
    }

    /// Collect every match, stopping at the first error
    ///
    /// # Errors
    ///
    /// Returns the first error item.
    pub async fn collect(mut self) -> Result<Vec<AsyncPath>> {
        let mut matches = Vec::new();
        while let Some(item) = self.next().await {
            matches.push(item?);
        }
        Ok(matches)
    }
}

impl std::fmt::Debug for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Glob")
            .field("pattern", &self.pattern.as_str())
            .field("options", &self.options)
            .field("depth", &self.stack.len())
            .field("matched", &self.matched)
            .field("state", &self.state)
            .finish()
    }
}

/// Open the cursor on first use, then pull one entry
async fn advance(
    bridge: &crate::bridge::SyscallBridge,
    dir: &PurePath,
    cursor: &mut Option<Cursor>,
    sorted: bool,
) -> Result<Option<DirEntry>> {
    if cursor.is_none() {
        *cursor = Some(Cursor::open(bridge, dir.as_path(), sorted).await?);
    }
    match cursor.as_mut() {
        Some(cursor) => cursor.next_entry().await,
        None => Ok(None),
    }
}

fn scan_entry(
    dir: &PurePath,
    index: usize,
    segment: &NamePattern,
    entry: &DirEntry,
    last: bool,
) -> Option<Frame> {
    if entry.is_hidden() && !segment.matches_hidden() {
        return None;
    }
    if !segment.matches(entry.name()) {
        return None;
    }
    let path = dir.child(entry.name());
    match (last, entry.kind()) {
        // Listed, so it exists
        (true, _) => Some(Frame::Enter {
            path,
            index: index + 1,
        }),
        (false, EntryKind::Dir) => Some(Frame::Enter {
            path,
            index: index + 1,
        }),
        (false, EntryKind::File) => None,
        (false, EntryKind::Symlink | EntryKind::Unknown) => Some(Frame::Check {
            path,
            index: index + 1,
            need_dir: true,
        }),
    }
}

fn descend_entry(dir: &PurePath, index: usize, entry: &DirEntry) -> Option<Frame> {
    if entry.is_hidden() {
        return None;
    }
    let path = dir.child(entry.name());
    match entry.kind() {
        EntryKind::Dir => Some(Frame::Enter { path, index }),
        EntryKind::File => None,
        EntryKind::Symlink | EntryKind::Unknown => Some(Frame::Check {
            path,
            index,
            need_dir: true,
        }),
    }
}
