//! Command-line behaviour of the `arpath` binary

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

mod common;
use common::build_tree;

fn arpath() -> Command {
    Command::cargo_bin("arpath").unwrap()
}

#[test]
fn test_glob_prints_matches() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    build_tree(temp_dir.path(), &["a.txt", "b.txt", "sub/c.txt", "skip.md"]);

    let output = arpath()
        .arg("glob")
        .arg("**/*.txt")
        .arg(temp_dir.path())
        .arg("--sorted")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    let root = temp_dir.path().display().to_string();
    assert_eq!(
        lines,
        vec![
            format!("{root}/a.txt"),
            format!("{root}/b.txt"),
            format!("{root}/sub/c.txt"),
        ]
    );
}

#[test]
fn test_glob_limit_stops_early() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    build_tree(temp_dir.path(), &["1", "2", "3", "4", "5"]);

    let output = arpath()
        .args(["glob", "*", "--limit", "2"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
}

#[test]
fn test_glob_rejects_bad_pattern() {
    arpath()
        .args(["glob", "/absolute/*"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("non-relative patterns are unsupported"));

    arpath()
        .args(["glob", "a**"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'**'"));
}

#[test]
fn test_stat_describes_files_and_directories() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    build_tree(temp_dir.path(), &["file.txt", "dir/"]);

    arpath()
        .arg("stat")
        .arg(temp_dir.path().join("file.txt"))
        .arg(temp_dir.path().join("dir"))
        .assert()
        .success()
        .stdout(predicate::str::contains("type=file size=8"))
        .stdout(predicate::str::contains("type=directory"));

    arpath()
        .arg("stat")
        .arg(temp_dir.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[cfg(unix)]
#[test]
fn test_stat_no_follow_reports_symlink() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    build_tree(temp_dir.path(), &["target"]);
    std::os::unix::fs::symlink("target", temp_dir.path().join("link")).unwrap();

    arpath()
        .args(["stat", "--no-follow"])
        .arg(temp_dir.path().join("link"))
        .assert()
        .success()
        .stdout(predicate::str::contains("type=symlink"));
}

#[test]
fn test_ls_hides_dot_entries_unless_all() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    build_tree(temp_dir.path(), &["b", "a", ".hidden"]);

    arpath()
        .arg("ls")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout("a\nb\n");

    arpath()
        .args(["ls", "-a"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(".hidden\na\nb\n");
}

#[test]
fn test_cat_prints_contents() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("hello"), "hello world\n").unwrap();

    arpath()
        .arg("cat")
        .arg(temp_dir.path().join("hello"))
        .assert()
        .success()
        .stdout("hello world\n");
}

#[test]
fn test_conflicting_output_flags() {
    arpath()
        .args(["-q", "-v", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--quiet"));
}
