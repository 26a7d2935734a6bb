//! Crate-level error type.
//!
//! Every public operation in [`crate::ops`] returns `Result<T, Error>`. The core
//! never encodes errors as negative integers itself; that translation belongs to
//! the bridge that sits on top of this crate, and [`Error::errno`] gives it the
//! mapping (§6) instead of making it guess.

use thiserror::Error;

/// Everything that can go wrong inside the filesystem core.
#[derive(Error, Debug)]
pub enum Error {
    /// A path does not resolve to any inode.
    #[error("no such file or directory")]
    NotFound,
    /// `mknod`/`link` target path already names an inode.
    #[error("file already exists")]
    AlreadyExists,
    /// The block or inode bitmap is exhausted.
    #[error("no space left on device")]
    NoSpace,
    /// A path component that should be a directory is not one.
    #[error("not a directory")]
    NotDirectory,
    /// `rmdir` on a directory that still has entries.
    #[error("directory not empty")]
    NotEmpty,
    /// A name is empty or `>= 48` bytes (the on-disk name field holds at most 47
    /// usable characters plus the terminating NUL).
    #[error("file name too long")]
    NameTooLong,
    /// An argument outside of any of the above (e.g. a relative path).
    #[error("invalid argument")]
    InvalidArgument,
    /// The host filesystem itself failed us (open/extend/map the backing file).
    #[error("backing storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The positive POSIX errno a bridge would negate before returning it to the
    /// kernel (§6). `Io` has no single canonical errno; bridges that need one
    /// should inspect the wrapped [`std::io::Error`] instead.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NoSpace => libc::ENOSPC,
            Error::NotDirectory => libc::ENOTDIR,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::InvalidArgument => libc::EINVAL,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Prints a diagnostic to stderr and aborts the process.
///
/// Reserved for the one truly unrecoverable condition this crate recognizes
/// (§5: the backing image cannot be mapped at `storage_init`); every other
/// failure is surfaced through [`Error`] instead.
pub fn fatal(context: &str, err: &Error) -> ! {
    eprintln!("tinyfs: fatal: {context}: {err}");
    std::process::exit(1);
}
