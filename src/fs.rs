//! The filesystem context paths are bound to
//!
//! There is no global state: an [`Fs`] bundles the syscall bridge and the
//! metadata cache, and every [`AsyncPath`] carries the `Fs` it was made
//! from. Tests build isolated instances; applications usually make one.

use crate::bridge::{BridgeOptions, Syscall, SyscallBridge};
use crate::cache::MetadataCache;
use crate::error::Result;
use crate::path::{AsyncPath, PurePath};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Shared bridge and cache
///
/// Cheap to clone; clones share both.
#[derive(Debug, Clone, Default)]
pub struct Fs {
    bridge: SyscallBridge,
    cache: MetadataCache,
}

impl Fs {
    /// Create a context with a fresh bridge and an empty cache
    #[must_use]
    pub fn new(options: BridgeOptions) -> Self {
        Self::with_parts(SyscallBridge::new(options), MetadataCache::new())
    }

    /// Assemble a context from existing parts
    #[must_use]
    pub fn with_parts(bridge: SyscallBridge, cache: MetadataCache) -> Self {
        Self { bridge, cache }
    }

    /// The syscall bridge
    #[must_use]
    pub fn bridge(&self) -> &SyscallBridge {
        &self.bridge
    }

    /// The metadata cache
    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Parse `text` into a path bound to this context
    ///
    /// # Errors
    ///
    /// Returns `MalformedPath` if `text` does not parse.
    pub fn path(&self, text: impl AsRef<OsStr>) -> Result<AsyncPath> {
        Ok(self.bind(PurePath::parse(text)?))
    }

    /// Bind an already parsed path to this context
    #[must_use]
    pub fn bind(&self, pure: PurePath) -> AsyncPath {
        AsyncPath::new(pure, self.clone())
    }

    /// The current working directory
    ///
    /// # Errors
    ///
    /// Returns the classified `Lookup` error.
    pub async fn cwd(&self) -> Result<AsyncPath> {
        let dir = self
            .bridge
            .dispatch(Syscall::Lookup, Path::new("."), std::env::current_dir)
            .await?;
        self.path(dir)
    }

    /// The current user's home directory
    ///
    /// Taken from `HOME`, falling back to the password database.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither source knows a home directory.
    pub async fn home(&self) -> Result<AsyncPath> {
        let dir = self
            .bridge
            .dispatch(Syscall::Lookup, Path::new("~"), home_dir)
            .await?;
        self.path(dir)
    }

    /// Home directory of `user`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user.
    pub(crate) async fn user_home(&self, user: &str) -> Result<AsyncPath> {
        let name = user.to_string();
        let key = PathBuf::from(format!("~{user}"));
        let dir = self
            .bridge
            .dispatch(Syscall::Lookup, &key, move || user_home_dir(&name))
            .await?;
        self.path(dir)
    }
}

fn not_found(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, format!("no home directory for {what}"))
}

fn home_dir() -> std::io::Result<PathBuf> {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    #[cfg(unix)]
    {
        let user = nix::unistd::User::from_uid(nix::unistd::getuid()).map_err(std::io::Error::from)?;
        if let Some(user) = user {
            return Ok(user.dir);
        }
    }
    Err(not_found("the current user"))
}

#[cfg(unix)]
fn user_home_dir(name: &str) -> std::io::Result<PathBuf> {
    nix::unistd::User::from_name(name)
        .map_err(std::io::Error::from)?
        .map(|user| user.dir)
        .ok_or_else(|| not_found(name))
}

#[cfg(not(unix))]
fn user_home_dir(name: &str) -> std::io::Result<PathBuf> {
    Err(not_found(name))
}

impl From<BridgeOptions> for Fs {
    fn from(options: BridgeOptions) -> Self {
        Self::new(options)
    }
}
