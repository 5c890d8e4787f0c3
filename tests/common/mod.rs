//! Shared fixtures for the integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use arpath::{AsyncPath, BridgeOptions, Fs, PureOps};
use std::path::Path;
use tempfile::TempDir;

/// Fresh temp directory, an isolated `Fs`, and the directory as a path
pub fn setup() -> (TempDir, Fs, AsyncPath) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fs = Fs::new(BridgeOptions::new(4));
    let root = fs.path(temp_dir.path()).expect("temp dir path parses");
    (temp_dir, fs, root)
}

/// Create files and directories under `root`
///
/// Entries ending in `/` are directories; anything else is a file whose
/// contents are its own relative path.
pub fn build_tree(root: &Path, entries: &[&str]) {
    for entry in entries {
        let path = root.join(entry.trim_end_matches('/'));
        if entry.ends_with('/') {
            std::fs::create_dir_all(&path).expect("Failed to create directory");
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create parent");
            }
            std::fs::write(&path, entry.as_bytes()).expect("Failed to write file");
        }
    }
}

/// Matches rendered relative to `root`, in yield order
pub fn relative(root: &AsyncPath, matches: &[AsyncPath]) -> Vec<String> {
    matches
        .iter()
        .map(|path| {
            path.relative_to(root.pure())
                .expect("match lies under the root")
                .to_string()
        })
        .collect()
}

/// As [`relative`], sorted
pub fn relative_sorted(root: &AsyncPath, matches: &[AsyncPath]) -> Vec<String> {
    let mut names = relative(root, matches);
    names.sort();
    names
}

/// Whether the tests run with root privileges (permission bits are moot)
#[cfg(unix)]
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}
