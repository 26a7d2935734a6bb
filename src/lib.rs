//! A small on-disk filesystem core: a fixed-size block/inode bitmap allocator,
//! a flat inode table with direct + single-indirect block pointers, a directory
//! layer of fixed-width name/inode entries, a path resolver over it, and the
//! path-indexed operation surface ([`Filesystem`]) a bridge composes into
//! syscalls.
//!
//! Module layout mirrors the on-disk layers bottom-up: [`raw`] is the one place
//! that overlays typed records onto raw bytes, [`image`] maps the backing file,
//! [`bitmap`] and [`inode`] manage allocation, [`dir`] and [`path`] build the
//! namespace on top, and [`ops`] is the public surface.

mod bitmap;
mod dir;
mod error;
mod image;
mod inode;
mod ops;
mod path;
mod raw;

pub use error::{Error, Result};
pub use ops::{Filesystem, Metadata};
