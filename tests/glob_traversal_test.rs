//! Glob traversal against real directory trees
//!
//! Covers recursion, hidden-name rules, literal probing, ordering, symlink
//! cycles, early cancellation, and lenient vs strict error handling.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use arpath::{FsError, FsOps, GlobOptions, PureOps};
use futures::StreamExt;
use std::collections::HashSet;
use walkdir::WalkDir;

mod common;
use common::{build_tree, relative, relative_sorted, setup};

#[compio::test]
async fn test_star_and_globstar() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["a.txt", "b.txt", "notes.md", "sub/c.txt", "sub/deep/d.txt"]);

    let top = root.glob("*.txt")?.collect().await?;
    assert_eq!(relative_sorted(&root, &top), vec!["a.txt", "b.txt"]);

    let all = root.glob("**/*.txt")?.collect().await?;
    assert_eq!(
        relative_sorted(&root, &all),
        vec!["a.txt", "b.txt", "sub/c.txt", "sub/deep/d.txt"]
    );

    let recursive = root.rglob("*.txt")?.collect().await?;
    assert_eq!(relative_sorted(&root, &recursive), relative_sorted(&root, &all));
    Ok(())
}

#[compio::test]
async fn test_globstar_alone_yields_root_and_directories() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["x/y/", "x/file", "z/"]);

    let dirs = root.glob("**")?.collect().await?;
    assert_eq!(relative_sorted(&root, &dirs), vec![".", "x", "x/y", "z"]);
    Ok(())
}

#[compio::test]
async fn test_matches_agree_with_walkdir() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(
        temp_dir.path(),
        &[
            "one.rs",
            "src/lib.rs",
            "src/glob/mod.rs",
            "src/glob/pattern.rs",
            "src/empty/",
            "docs/guide/intro.md",
            "docs/guide/assets/",
            "target/debug/build.log",
        ],
    );

    let found: HashSet<String> = relative(&root, &root.glob("**/*")?.collect().await?)
        .into_iter()
        .collect();

    let expected: HashSet<String> = WalkDir::new(temp_dir.path())
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            entry
                .unwrap()
                .path()
                .strip_prefix(temp_dir.path())
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    assert_eq!(found, expected);
    Ok(())
}

#[compio::test]
async fn test_hidden_names_need_an_explicit_dot() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(
        temp_dir.path(),
        &[".env", "visible", ".git/config", "pkg/.cache", "pkg/lib"],
    );

    let plain = root.glob("**/*")?.collect().await?;
    assert_eq!(relative_sorted(&root, &plain), vec!["pkg", "pkg/lib", "visible"]);

    let dotted = root.glob("**/.*")?.collect().await?;
    assert_eq!(relative_sorted(&root, &dotted), vec![".env", ".git", "pkg/.cache"]);

    // A literal hidden directory is entered like any other
    let config = root.glob(".git/*")?.collect().await?;
    assert_eq!(relative_sorted(&root, &config), vec![".git/config"]);
    Ok(())
}

#[compio::test]
async fn test_literal_pattern_looks_up_without_listing() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["sub/c.txt"]);

    let hit = root.glob("sub/c.txt")?.collect().await?;
    assert_eq!(relative(&root, &hit), vec!["sub/c.txt"]);

    assert!(root.glob("sub/missing.txt")?.collect().await?.is_empty());
    // A file cannot stand for a directory segment
    assert!(root.glob("sub/c.txt/x")?.collect().await?.is_empty());
    Ok(())
}

#[compio::test]
async fn test_sorted_order() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["m", "b", "z", "a", "k/x", "c"]);

    let options = GlobOptions::new().sorted(true);
    let matches = root.glob_with("*", options)?.collect().await?;
    assert_eq!(relative(&root, &matches), vec!["a", "b", "c", "k", "m", "z"]);
    Ok(())
}

#[compio::test]
async fn test_character_classes_and_case() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["log1", "log2", "logA", "README"]);

    let digits = root.glob("log[0-9]")?.collect().await?;
    assert_eq!(relative_sorted(&root, &digits), vec!["log1", "log2"]);

    let others = root.glob("log[!0-9]")?.collect().await?;
    assert_eq!(relative(&root, &others), vec!["logA"]);

    let insensitive = GlobOptions::new().case_sensitive(false);
    let readme = root.glob_with("read*", insensitive)?.collect().await?;
    assert_eq!(relative(&root, &readme), vec!["README"]);
    Ok(())
}

#[compio::test]
async fn test_missing_root_yields_nothing() -> anyhow::Result<()> {
    let (_temp_dir, _fs, root) = setup();
    let missing = root.joinpath("does/not/exist")?;
    assert!(missing.glob("**/*")?.collect().await?.is_empty());
    Ok(())
}

#[compio::test]
async fn test_invalid_patterns_fail_up_front() -> anyhow::Result<()> {
    let (_temp_dir, _fs, root) = setup();
    for pattern in ["", "/abs/*", "a**b"] {
        let err = root.glob(pattern).unwrap_err();
        assert!(
            matches!(err, FsError::InvalidPattern { .. }),
            "{pattern:?} gave {err:?}"
        );
    }
    Ok(())
}

#[cfg(unix)]
#[compio::test]
async fn test_symlink_cycle_is_entered_once() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["a/b/c/leaf.txt", "a/top.txt", "other.txt"]);
    std::os::unix::fs::symlink("../..", temp_dir.path().join("a/b/c/loop"))?;
    std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("a/back"))?;

    let matches = root.glob("**/*.txt")?.collect().await?;
    let names = relative(&root, &matches);
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(names.len(), unique.len(), "duplicate matches: {names:?}");
    assert_eq!(names.len(), 3, "one match per real file: {names:?}");
    assert!(names.contains(&"a/b/c/leaf.txt".to_string()));
    Ok(())
}

#[cfg(unix)]
#[compio::test]
async fn test_self_referencing_symlink_is_skipped() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["a.txt", "sub/c.txt"]);
    std::os::unix::fs::symlink("self", temp_dir.path().join("self"))?;
    std::os::unix::fs::symlink("pong", temp_dir.path().join("sub/ping"))?;
    std::os::unix::fs::symlink("ping", temp_dir.path().join("sub/pong"))?;

    let matches = root.glob("**/*.txt")?.collect().await?;
    assert_eq!(relative_sorted(&root, &matches), vec!["a.txt", "sub/c.txt"]);

    // Strict mode does not treat a looping link as an unreadable branch
    let strict = root
        .glob_with("**/*.txt", GlobOptions::new().strict(true))?
        .collect()
        .await?;
    assert_eq!(relative_sorted(&root, &strict), vec!["a.txt", "sub/c.txt"]);
    Ok(())
}

#[compio::test]
async fn test_multiple_globstars_yield_each_path_once() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["a/a/x.txt", "a/x.txt", "x.txt"]);

    let matches = root.glob("**/a/**/*.txt")?.collect().await?;
    let names = relative(&root, &matches);
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(names.len(), unique.len(), "duplicate matches: {names:?}");
    assert_eq!(relative_sorted(&root, &matches), vec!["a/a/x.txt", "a/x.txt"]);
    Ok(())
}

#[compio::test]
async fn test_cancel_releases_directory_streams() -> anyhow::Result<()> {
    let (temp_dir, fs, root) = setup();
    let entries: Vec<String> = (0..20).map(|i| format!("d{}/f{i}", i % 4)).collect();
    let entries: Vec<&str> = entries.iter().map(String::as_str).collect();
    build_tree(temp_dir.path(), &entries);

    let mut matches = root.glob("**/*")?;
    for _ in 0..3 {
        assert!(matches.next().await.transpose()?.is_some());
    }
    assert_eq!(matches.matched(), 3);

    matches.cancel();
    assert!(matches.is_finished());
    assert!(matches.next().await.is_none());
    assert_eq!(fs.bridge().stats().open_handles, 0);

    // The bridge is still usable afterwards
    assert!(root.joinpath("d0")?.is_dir().await?);
    Ok(())
}

#[compio::test]
async fn test_dropping_a_glob_releases_streams() -> anyhow::Result<()> {
    let (temp_dir, fs, root) = setup();
    build_tree(temp_dir.path(), &["a/1", "a/2", "b/1", "b/2", "c"]);

    {
        let mut matches = root.glob("**/*")?;
        matches.next().await.transpose()?;
    }
    assert_eq!(fs.bridge().stats().open_handles, 0);
    Ok(())
}

#[compio::test]
async fn test_stream_adapter() -> anyhow::Result<()> {
    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["a.txt", "b.txt", "c.txt"]);

    let first_two: Vec<_> = root.glob("*.txt")?.into_stream().take(2).collect().await;
    assert_eq!(first_two.len(), 2);
    assert!(first_two.iter().all(Result::is_ok));
    Ok(())
}

#[cfg(unix)]
#[compio::test]
async fn test_unreadable_directory_lenient_and_strict() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if common::is_root() {
        eprintln!("skipping: permission bits do not apply to root");
        return Ok(());
    }

    let (temp_dir, _fs, root) = setup();
    build_tree(temp_dir.path(), &["open/a.txt", "locked/b.txt", "c.txt"]);
    let locked = temp_dir.path().join("locked");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000))?;

    let lenient = root.glob("**/*.txt")?.collect().await;
    let strict_items: Vec<_> = root
        .glob_with("**/*.txt", GlobOptions::new().strict(true))?
        .into_stream()
        .collect()
        .await;

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))?;

    let lenient = lenient?;
    assert_eq!(relative_sorted(&root, &lenient), vec!["c.txt", "open/a.txt"]);

    let mut found = Vec::new();
    let mut denied = 0;
    for item in strict_items {
        match item {
            Ok(path) => found.push(path),
            Err(FsError::PermissionDenied { .. }) => denied += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(denied >= 1);
    // The walk carries on past the unreadable branch
    assert_eq!(relative_sorted(&root, &found), vec!["c.txt", "open/a.txt"]);
    Ok(())
}
