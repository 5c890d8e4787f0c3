//! Pure path values and the `PureOps` capability
//!
//! A [`PurePath`] is parsed once into drive, root flag and segments and is
//! never touched again; every operation here is synchronous and does no I/O.

use crate::error::{FsError, Result};
use crate::glob::pattern;
use std::cmp::Ordering;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Div;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR};
use std::str::FromStr;

/// Immutable, structurally compared filesystem path
///
/// Parsing is lenient: repeated separators collapse, `.` segments are
/// dropped and `..` is kept verbatim (only [`PureOps::normalize`] folds it).
/// The rendered form is computed once and backs [`AsRef<Path>`].
#[derive(Clone)]
pub struct PurePath {
    drive: OsString,
    root: bool,
    segments: Vec<OsString>,
    rendered: PathBuf,
}

impl PurePath {
    /// Parse `text` into a path
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if `text` contains a NUL byte, which no
    /// platform accepts in a path.
    pub fn parse(text: impl AsRef<OsStr>) -> Result<Self> {
        let text = text.as_ref();
        if contains_nul(text) {
            return Err(FsError::malformed(
                text.to_string_lossy(),
                "path contains a NUL byte",
            ));
        }

        let mut drive = OsString::new();
        let mut root = false;
        let mut segments = Vec::new();
        for component in Path::new(text).components() {
            match component {
                Component::Prefix(prefix) => drive = prefix.as_os_str().to_os_string(),
                Component::RootDir => root = true,
                Component::CurDir => {}
                Component::ParentDir => segments.push(OsString::from("..")),
                Component::Normal(name) => segments.push(name.to_os_string()),
            }
        }
        Ok(Self::from_parts(drive, root, segments))
    }

    pub(crate) fn from_parts(drive: OsString, root: bool, segments: Vec<OsString>) -> Self {
        let mut text = drive.clone();
        if root {
            text.push(MAIN_SEPARATOR_STR);
        }
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                text.push(MAIN_SEPARATOR_STR);
            }
            text.push(segment);
        }
        if text.is_empty() {
            text.push(".");
        }
        Self {
            drive,
            root,
            segments,
            rendered: PathBuf::from(text),
        }
    }

    /// Append a single name known to be a valid segment (directory entry names)
    pub(crate) fn child(&self, name: &OsStr) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_os_string());
        Self::from_parts(self.drive.clone(), self.root, segments)
    }

    /// The rendered path
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.rendered
    }

    /// Owned copy of the rendered path
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        self.rendered.clone()
    }

    /// Join `other` onto this path; an anchored `other` replaces this path
    #[must_use]
    pub fn join(&self, other: &PurePath) -> Self {
        if other.root || !other.drive.is_empty() {
            return other.clone();
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self::from_parts(self.drive.clone(), self.root, segments)
    }
}

#[cfg(unix)]
fn contains_nul(text: &OsStr) -> bool {
    use std::os::unix::ffi::OsStrExt;
    text.as_bytes().contains(&0)
}

#[cfg(windows)]
fn contains_nul(text: &OsStr) -> bool {
    use std::os::windows::ffi::OsStrExt;
    text.encode_wide().any(|unit| unit == 0)
}

fn is_valid_name(name: &OsStr) -> bool {
    !name.is_empty()
        && name != "."
        && Path::new(name).components().count() == 1
        && matches!(Path::new(name).components().next(), Some(Component::Normal(_)))
}

impl PartialEq for PurePath {
    fn eq(&self, other: &Self) -> bool {
        self.drive == other.drive && self.root == other.root && self.segments == other.segments
    }
}

impl Eq for PurePath {}

impl Hash for PurePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.drive.hash(state);
        self.root.hash(state);
        self.segments.hash(state);
    }
}

impl PartialOrd for PurePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PurePath {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.drive, self.root, &self.segments).cmp(&(&other.drive, other.root, &other.segments))
    }
}

impl fmt::Debug for PurePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PurePath({:?})", self.rendered)
    }
}

impl fmt::Display for PurePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.rendered.display(), f)
    }
}

impl AsRef<Path> for PurePath {
    fn as_ref(&self) -> &Path {
        &self.rendered
    }
}

impl FromStr for PurePath {
    type Err = FsError;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl TryFrom<&Path> for PurePath {
    type Error = FsError;

    fn try_from(path: &Path) -> Result<Self> {
        Self::parse(path.as_os_str())
    }
}

impl TryFrom<PathBuf> for PurePath {
    type Error = FsError;

    fn try_from(path: PathBuf) -> Result<Self> {
        Self::parse(path.as_os_str())
    }
}

impl TryFrom<&str> for PurePath {
    type Error = FsError;

    fn try_from(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl From<PurePath> for PathBuf {
    fn from(path: PurePath) -> Self {
        path.rendered
    }
}

impl Div<&PurePath> for &PurePath {
    type Output = PurePath;

    fn div(self, rhs: &PurePath) -> PurePath {
        self.join(rhs)
    }
}

/// Pure, I/O-free path operations
///
/// Implementors only provide access to their [`PurePath`] and a way to
/// rebuild themselves around a new one; everything else is provided.
pub trait PureOps: Sized {
    /// The underlying pure path
    fn pure(&self) -> &PurePath;

    /// A value of the same kind wrapping `pure`
    #[must_use]
    fn with_pure(&self, pure: PurePath) -> Self;

    /// Path segments, without drive or root
    fn segments(&self) -> &[OsString] {
        &self.pure().segments
    }

    /// Drive or UNC prefix; empty on Unix
    fn drive(&self) -> &OsStr {
        &self.pure().drive
    }

    /// Whether the path has a root separator
    fn has_root(&self) -> bool {
        self.pure().root
    }

    /// Drive and root together
    fn anchor(&self) -> OsString {
        let mut anchor = self.drive().to_os_string();
        if self.has_root() {
            anchor.push(MAIN_SEPARATOR_STR);
        }
        anchor
    }

    /// Whether the path is absolute on this platform
    fn is_absolute(&self) -> bool {
        self.has_root() && (cfg!(unix) || !self.drive().is_empty())
    }

    /// Final segment, if any
    fn name(&self) -> Option<&OsStr> {
        self.segments().last().map(OsString::as_os_str)
    }

    /// Final segment without its last suffix
    fn stem(&self) -> Option<&OsStr> {
        self.name().and_then(|name| Path::new(name).file_stem())
    }

    /// Last suffix of the final segment, dot included (`".gz"` for `a.tar.gz`)
    ///
    /// Non-UTF-8 suffixes are converted lossily.
    fn suffix(&self) -> Option<String> {
        let name = self.name()?;
        let ext = Path::new(name).extension()?;
        (!ext.is_empty()).then(|| format!(".{}", ext.to_string_lossy()))
    }

    /// All suffixes of the final segment (`[".tar", ".gz"]` for `a.tar.gz`)
    fn suffixes(&self) -> Vec<String> {
        let Some(name) = self.name() else {
            return Vec::new();
        };
        let name = name.to_string_lossy();
        if name.ends_with('.') {
            return Vec::new();
        }
        name.trim_start_matches('.')
            .split('.')
            .skip(1)
            .map(|part| format!(".{part}"))
            .collect()
    }

    /// Logical parent; the parent of an anchor or of `.` is itself
    #[must_use]
    fn parent(&self) -> Self {
        let pure = self.pure();
        let mut segments = pure.segments.clone();
        if segments.pop().is_none() {
            return self.with_pure(pure.clone());
        }
        self.with_pure(PurePath::from_parts(pure.drive.clone(), pure.root, segments))
    }

    /// All logical ancestors, nearest first, excluding the path itself
    fn parents(&self) -> Vec<Self> {
        let pure = self.pure();
        (0..pure.segments.len())
            .rev()
            .map(|len| {
                self.with_pure(PurePath::from_parts(
                    pure.drive.clone(),
                    pure.root,
                    pure.segments[..len].to_vec(),
                ))
            })
            .collect()
    }

    /// Join another path onto this one (`a / b`)
    #[must_use]
    fn join(&self, other: &PurePath) -> Self {
        self.with_pure(self.pure().join(other))
    }

    /// Parse `segment` and join it onto this path
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if `segment` does not parse.
    fn joinpath(&self, segment: impl AsRef<OsStr>) -> Result<Self> {
        let other = PurePath::parse(segment)?;
        Ok(self.join(&other))
    }

    /// Replace the final segment
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if the path has no name or `name` is not a
    /// single plain segment.
    fn with_name(&self, name: impl AsRef<OsStr>) -> Result<Self> {
        let name = name.as_ref();
        let pure = self.pure();
        if pure.segments.is_empty() {
            return Err(FsError::malformed(pure.to_string(), "path has an empty name"));
        }
        if contains_nul(name) || !is_valid_name(name) {
            return Err(FsError::malformed(name.to_string_lossy(), "invalid name"));
        }
        let mut segments = pure.segments.clone();
        if let Some(last) = segments.last_mut() {
            *last = name.to_os_string();
        }
        Ok(self.with_pure(PurePath::from_parts(pure.drive.clone(), pure.root, segments)))
    }

    /// Replace the stem, keeping the suffix
    ///
    /// # Errors
    ///
    /// Same as [`PureOps::with_name`].
    fn with_stem(&self, stem: &str) -> Result<Self> {
        let suffix = self.suffix().unwrap_or_default();
        self.with_name(format!("{stem}{suffix}"))
    }

    /// Replace the last suffix; an empty `suffix` strips it
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if `suffix` is neither empty nor a dot
    /// followed by a separator-free name, or if the path has no name.
    fn with_suffix(&self, suffix: &str) -> Result<Self> {
        let valid = suffix.is_empty()
            || (suffix.starts_with('.')
                && suffix.len() > 1
                && !suffix.chars().any(std::path::is_separator));
        if !valid {
            return Err(FsError::malformed(suffix, "invalid suffix"));
        }
        let stem = self
            .stem()
            .ok_or_else(|| FsError::malformed(self.pure().to_string(), "path has an empty name"))?;
        let mut name = stem.to_os_string();
        name.push(suffix);
        self.with_name(name)
    }

    /// Whether `base` is an ancestor of (or equal to) this path
    fn is_relative_to(&self, base: &PurePath) -> bool {
        let pure = self.pure();
        pure.drive == base.drive
            && pure.root == base.root
            && pure.segments.starts_with(&base.segments)
    }

    /// This path expressed relative to `base`
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if `base` is not an ancestor of this path.
    fn relative_to(&self, base: &PurePath) -> Result<Self> {
        if !self.is_relative_to(base) {
            return Err(FsError::malformed(
                self.pure().to_string(),
                "path is not below the given base",
            ));
        }
        let rest = self.pure().segments[base.segments.len()..].to_vec();
        Ok(self.with_pure(PurePath::from_parts(OsString::new(), false, rest)))
    }

    /// Fold `..` segments lexically
    ///
    /// Symlinks are not resolved, so `a/link/..` becomes `a` even when `link`
    /// points elsewhere. `..` directly under the root is dropped; leading
    /// `..` of a relative path is kept.
    #[must_use]
    fn normalize(&self) -> Self {
        let pure = self.pure();
        let mut segments: Vec<OsString> = Vec::with_capacity(pure.segments.len());
        for segment in &pure.segments {
            if segment == ".." {
                match segments.last() {
                    Some(last) if last != ".." => {
                        segments.pop();
                    }
                    _ if pure.root => {}
                    _ => segments.push(segment.clone()),
                }
            } else {
                segments.push(segment.clone());
            }
        }
        self.with_pure(PurePath::from_parts(pure.drive.clone(), pure.root, segments))
    }

    /// Glob-match this path against `pattern`
    ///
    /// A relative pattern matches from the right; an absolute pattern must
    /// match the whole path. Matching is case-sensitive on Unix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` for an empty pattern.
    fn matches(&self, pattern: &str) -> Result<bool> {
        pattern::match_path(self.pure(), pattern, pattern::default_case_sensitive())
    }
}

impl PureOps for PurePath {
    fn pure(&self) -> &PurePath {
        self
    }

    fn with_pure(&self, pure: PurePath) -> Self {
        pure
    }
}
