//! Glob selection over the filesystem
//!
//! - `pattern`: compiling patterns and matching single names
//! - `selector`: the resumable traversal that yields matches

pub mod pattern;
mod selector;

pub use pattern::{NamePattern, Pattern, Segment};
pub use selector::Glob;

/// Options for a glob traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobOptions {
    /// Surface permission and not-a-directory failures of single branches
    /// instead of skipping them
    pub strict: bool,
    /// List each directory completely and visit entries in name order
    pub sorted: bool,
    /// Override the platform default case sensitivity
    pub case_sensitive: Option<bool>,
}

impl GlobOptions {
    /// Default options: lenient, raw listing order, platform case rules
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report branch-level failures
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Visit entries in name order
    #[must_use]
    pub const fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    /// Force case-sensitive or case-insensitive matching
    #[must_use]
    pub const fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    pub(crate) fn effective_case_sensitive(&self) -> bool {
        self.case_sensitive
            .unwrap_or_else(pattern::default_case_sensitive)
    }
}
