//! # arpath
//!
//! Async path model and lazy glob traversal for compio's cooperative,
//! single-threaded scheduler.
//!
//! Every blocking filesystem call (stat, readdir, open, mkdir, ...) goes
//! through one [`SyscallBridge`], which runs it on compio's blocking pool,
//! bounds how many are in flight, keeps calls on the same path in issue
//! order, and classifies failures into [`FsError`]. Paths are immutable
//! values: [`PurePath`] for pure manipulation and [`AsyncPath`] for paths
//! bound to an [`Fs`] context.
//!
//! ```rust,ignore
//! use arpath::{Fs, FsOps, PureOps};
//!
//! #[compio::main]
//! async fn main() -> arpath::Result<()> {
//!     let fs = Fs::default();
//!     let mut matches = fs.path("src")?.glob("**/*.rs")?;
//!     while let Some(path) = matches.next().await {
//!         println!("{}", path?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cache;
pub mod cli;
pub mod directory;
pub mod error;
pub mod file;
pub mod fs;
pub mod glob;
pub mod metadata;
pub mod path;

pub use bridge::{BridgeOptions, BridgeStats, Syscall, SyscallBridge};
pub use cache::{CachePolicy, CachedStat, MetadataCache};
pub use directory::{DirEntry, DirIter, DirStream, EntryKind};
pub use error::{FsError, Result};
pub use file::{FileSession, Lines, OpenMode, OpenOptions};
pub use fs::Fs;
pub use glob::{Glob, GlobOptions};
pub use metadata::Metadata;
pub use path::{AsyncPath, FsOps, MkdirOptions, PureOps, PurePath};
