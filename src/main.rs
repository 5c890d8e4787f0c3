//! arpath command-line frontend

use anyhow::{Context, Result};
use arpath::cli::{Args, Command};
use arpath::{Fs, FsOps, Metadata, PureOps};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info};

#[compio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(args.output.log_level())
        .with_writer(std::io::stderr)
        .init();

    let fs = Fs::new(args.bridge.to_options());
    debug!("bridge options: {:?}", fs.bridge().options());

    let result = match &args.command {
        Command::Glob {
            pattern,
            root,
            glob,
        } => run_glob(&fs, root, pattern, glob.to_options(), glob.limit).await,
        Command::Stat { paths, no_follow } => run_stat(&fs, paths, !no_follow).await,
        Command::Ls { dir, all } => run_ls(&fs, dir, *all).await,
        Command::Cat { file } => run_cat(&fs, file).await,
    };

    info!("bridge stats: {:?}", fs.bridge().stats());
    result
}

async fn run_glob(
    fs: &Fs,
    root: &Path,
    pattern: &str,
    options: arpath::GlobOptions,
    limit: Option<usize>,
) -> Result<()> {
    let mut matches = fs.path(root)?.glob_with(pattern, options)?;
    let mut stdout = std::io::stdout().lock();
    let mut printed = 0;
    let mut failures = 0;

    while let Some(item) = matches.next().await {
        match item {
            Ok(path) => {
                writeln!(stdout, "{path}")?;
                printed += 1;
                if limit.is_some_and(|limit| printed >= limit) {
                    matches.cancel();
                }
            }
            Err(err) if err.is_branch_recoverable() => {
                error!("{err}");
                failures += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    stdout.flush()?;

    if failures > 0 {
        anyhow::bail!("{failures} directories could not be searched");
    }
    Ok(())
}

async fn run_stat(fs: &Fs, paths: &[std::path::PathBuf], follow_symlinks: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for text in paths {
        let path = fs.path(text)?;
        let metadata = path
            .stat_with(follow_symlinks, arpath::CachePolicy::Refresh)
            .await
            .with_context(|| format!("cannot stat {}", text.display()))?;
        writeln!(stdout, "{}", describe(&path.to_string(), &metadata))?;
    }
    Ok(())
}

fn describe(name: &str, metadata: &Metadata) -> String {
    let kind = if metadata.is_dir() {
        "directory"
    } else if metadata.is_symlink() {
        "symlink"
    } else if metadata.is_file() {
        "file"
    } else {
        "other"
    };
    let modified = metadata
        .modified
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!(
        "{name}: type={kind} size={} mode={:04o} nlink={} uid={} gid={} modified={modified}",
        metadata.size,
        metadata.permissions(),
        metadata.nlink,
        metadata.uid,
        metadata.gid,
    )
}

async fn run_ls(fs: &Fs, dir: &Path, all: bool) -> Result<()> {
    let children = fs
        .path(dir)?
        .iterdir()
        .await
        .with_context(|| format!("cannot list {}", dir.display()))?
        .collect()
        .await?;

    let mut names: Vec<String> = children
        .iter()
        .filter_map(|child| child.name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|name| all || !name.starts_with('.'))
        .collect();
    names.sort();

    let mut stdout = std::io::stdout().lock();
    for name in names {
        writeln!(stdout, "{name}")?;
    }
    Ok(())
}

async fn run_cat(fs: &Fs, file: &Path) -> Result<()> {
    let data = fs
        .path(file)?
        .read_bytes()
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}
