//! Path values and the capabilities that operate on them
//!
//! - `pure`: [`PurePath`] and [`PureOps`], synchronous and I/O-free
//! - `async_path`: [`AsyncPath`] and [`FsOps`], bound to an [`Fs`](crate::Fs)

mod async_path;
mod pure;

pub use async_path::{AsyncPath, FsOps, MkdirOptions};
pub use pure::{PureOps, PurePath};
