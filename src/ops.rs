//! Operation surface (§4.6): the path-indexed verbs a bridge composes into
//! syscalls, built on top of the path resolver, inode table, and directory layer.

use std::path::Path;

use crate::bitmap::{self, reserve_metadata_blocks};
use crate::dir;
use crate::error::{fatal, Error, Result};
use crate::image::Image;
use crate::inode::{self, S_IFDIR};
use crate::path;
use crate::raw::BLOCK_SIZE;

/// Metadata returned by [`Filesystem::stat`] (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ino: u32,
    pub blocks: u64,
    pub blksize: u32,
}

/// The single owning value threading the image mapping through every operation
/// (§9 "Process-wide state").
pub struct Filesystem {
    image: Image,
}

impl Filesystem {
    /// Opens or creates the backing image at `path`. A brand-new (all-zero)
    /// image is formatted in place: both bitmaps' reserved bits are set and the
    /// root directory is created at inode 0. Re-opening an already-formatted
    /// image leaves its contents untouched.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut image = Image::init(path)?;
        let is_fresh = bitmap::get(bitmap::block_bitmap(&mut image), 0) == 0;
        if is_fresh {
            reserve_metadata_blocks(&mut image);
            let root = inode::alloc_inode(&mut image).expect("a fresh inode table has room for inode 0");
            debug_assert_eq!(root, 0, "root must be allocated first to land on inode 0");
            inode::set_mode(&mut image, root, S_IFDIR | 0o755);
            inode::grow_inode(&mut image, root, BLOCK_SIZE as u64)
                .expect("a fresh image has room for the root directory's first block");
        }
        Ok(Self { image })
    }

    /// Like [`Filesystem::open`], but aborts the process on failure instead of
    /// returning an error (§5: "Fatal conditions... abort the process at
    /// `storage_init`").
    pub fn storage_init(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|e| fatal("storage_init", &Error::Io(e)))
    }

    fn inode_of(&self, path: &str) -> Result<usize> {
        path::tree_lookup(&self.image, path)
    }

    /// Fills a [`Metadata`] record for `path`. `NOT_FOUND` if it doesn't resolve.
    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let i = self.inode_of(path)?;
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        Ok(Metadata {
            mode: node.mode,
            size: node.size as u64,
            uid: node.uid as u32,
            gid: node.gid as u32,
            nlink: node.refs.max(0) as u32,
            atime: node.atime as i64,
            mtime: node.mtime as i64,
            ino: i as u32,
            blocks: (node.size as u64).div_ceil(512),
            blksize: BLOCK_SIZE as u32,
        })
    }

    /// Short-reads at EOF: returns 0 if `off >= size`, otherwise up to
    /// `min(buf.len(), size - off)` bytes. Updates `atime`.
    pub fn read(&mut self, path: &str, buf: &mut [u8], off: u64) -> Result<usize> {
        let i = self.inode_of(path)?;
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        let size = node.size as u64;
        if off >= size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(size - off);
        let mut done = 0u64;
        while done < want {
            let file_off = off + done;
            let block_idx = file_off / BLOCK_SIZE as u64;
            let block_off = (file_off % BLOCK_SIZE as u64) as usize;
            let Some(bnum) = inode::inode_get_bnum(&self.image, &node, block_idx) else {
                break;
            };
            let chunk = (BLOCK_SIZE - block_off).min((want - done) as usize);
            let block = self.image.get_block(bnum);
            buf[done as usize..done as usize + chunk].copy_from_slice(&block[block_off..block_off + chunk]);
            done += chunk as u64;
        }
        inode::touch_atime(&mut self.image, i);
        Ok(done as usize)
    }

    /// Writes `buf` at `off`, growing the file first if the write extends past
    /// its current size. Updates `mtime`. Returns the number of bytes written.
    pub fn write(&mut self, path: &str, buf: &[u8], off: u64) -> Result<usize> {
        let i = self.inode_of(path)?;
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        let end = off + buf.len() as u64;
        if end > node.size as u64 {
            inode::grow_inode(&mut self.image, i, end)?;
        }
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        let mut done = 0usize;
        while done < buf.len() {
            let file_off = off + done as u64;
            let block_idx = file_off / BLOCK_SIZE as u64;
            let block_off = (file_off % BLOCK_SIZE as u64) as usize;
            let Some(bnum) = inode::inode_get_bnum(&self.image, &node, block_idx) else {
                break;
            };
            let chunk = (BLOCK_SIZE - block_off).min(buf.len() - done);
            self.image.get_block_mut(bnum)[block_off..block_off + chunk]
                .copy_from_slice(&buf[done..done + chunk]);
            done += chunk;
        }
        inode::touch_mtime(&mut self.image, i);
        Ok(done)
    }

    /// Grows or shrinks `path` to exactly `new_size`; a no-op if already that
    /// size.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<()> {
        let i = self.inode_of(path)?;
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        let cur = node.size as u64;
        match new_size.cmp(&cur) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Greater => inode::grow_inode(&mut self.image, i, new_size),
            std::cmp::Ordering::Less => {
                inode::shrink_inode(&mut self.image, i, new_size);
                Ok(())
            }
        }
    }

    /// Creates a new file or directory at `path` with the given `mode`.
    /// `ALREADY_EXISTS` if `path` already resolves.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<()> {
        if self.inode_of(path).is_ok() {
            return Err(Error::AlreadyExists);
        }
        let parent = path::tree_lookup_parent(&self.image, path)?;
        let name = path::basename(path);

        let new_i = inode::alloc_inode(&mut self.image).ok_or(Error::NoSpace)?;
        inode::set_mode(&mut self.image, new_i, mode);

        if mode & S_IFDIR != 0 {
            if let Err(e) = inode::grow_inode(&mut self.image, new_i, BLOCK_SIZE as u64) {
                inode::free_inode(&mut self.image, new_i);
                return Err(e);
            }
        }

        if let Err(e) = dir::put(&mut self.image, parent, name, new_i as u32) {
            inode::free_inode(&mut self.image, new_i);
            return Err(e);
        }
        Ok(())
    }

    /// Convenience wrapper over [`Filesystem::mknod`] that forces the directory
    /// type bit into `mode` (§4.6.1).
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.mknod(path, mode | S_IFDIR)
    }

    /// Removes the directory entry naming `path` and drops its inode's `refs` by
    /// one, freeing the inode once `refs <= 0`.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let i = self.inode_of(path)?;
        let parent = path::tree_lookup_parent(&self.image, path)?;
        dir::delete(&mut self.image, parent, path::basename(path))?;
        if inode::bump_refs(&mut self.image, i, -1) <= 0 {
            inode::free_inode(&mut self.image, i);
        }
        Ok(())
    }

    /// [`Filesystem::unlink`] guarded by an emptiness check (§4.6.1).
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let i = self.inode_of(path)?;
        let node = inode::get_inode(&self.image, i).ok_or(Error::NotFound)?;
        if node.mode & S_IFDIR == 0 {
            return Err(Error::NotDirectory);
        }
        if !dir::list(&self.image, &node).is_empty() {
            return Err(Error::NotEmpty);
        }
        self.unlink(path)
    }

    /// Adds a new name `to` for the inode at `from`, incrementing its `refs`.
    /// `ALREADY_EXISTS` if `to` already resolves.
    pub fn link(&mut self, from: &str, to: &str) -> Result<()> {
        let i = self.inode_of(from)?;
        if self.inode_of(to).is_ok() {
            return Err(Error::AlreadyExists);
        }
        let parent = path::tree_lookup_parent(&self.image, to)?;
        dir::put(&mut self.image, parent, path::basename(to), i as u32)?;
        inode::bump_refs(&mut self.image, i, 1);
        Ok(())
    }

    /// Moves `from` to `to`. If `to` already exists it is unlinked first
    /// (§4.6, §9: not atomic). Neither parent's `mtime` is updated, matching the
    /// literal step sequence the spec assigns to this operation.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let i = self.inode_of(from)?;
        if self.inode_of(to).is_ok() {
            self.unlink(to)?;
        }
        let to_parent = path::tree_lookup_parent(&self.image, to)?;
        dir::put(&mut self.image, to_parent, path::basename(to), i as u32)?;
        let from_parent = path::tree_lookup_parent(&self.image, from)?;
        dir::delete(&mut self.image, from_parent, path::basename(from))?;
        Ok(())
    }

    /// Overwrites both `atime` and `mtime` with caller-supplied values.
    pub fn set_time(&mut self, path: &str, atime: i64, mtime: i64) -> Result<()> {
        let i = self.inode_of(path)?;
        inode::set_times(&mut self.image, i, atime as i32, mtime as i32);
        Ok(())
    }

    /// Replaces the permission bits of `path`'s mode, preserving its type bits.
    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let i = self.inode_of(path)?;
        inode::chmod(&mut self.image, i, mode);
        Ok(())
    }

    /// Returns the non-empty entry names of the directory at `path`, in on-disk
    /// order. A missing path or non-directory yields an empty list.
    pub fn list(&self, path: &str) -> Vec<String> {
        let Ok(i) = self.inode_of(path) else {
            return Vec::new();
        };
        let Some(node) = inode::get_inode(&self.image, i) else {
            return Vec::new();
        };
        if node.mode & S_IFDIR == 0 {
            return Vec::new();
        }
        dir::list(&self.image, &node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_fs(name: &str) -> (Filesystem, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("tinyfs_test_ops_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        let fs = Filesystem::open(&path).unwrap();
        (fs, path)
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn root_exists_and_is_empty_directory() {
        let (fs, path) = fresh_fs("root");
        let meta = fs.stat("/").unwrap();
        assert_eq!(meta.mode & S_IFDIR, S_IFDIR);
        assert_eq!(meta.ino, 0);
        assert!(fs.list("/").is_empty());
        cleanup(&path);
    }

    #[test]
    fn scenario_write_then_read_hello() {
        let (mut fs, path) = fresh_fs("hello");
        fs.mknod("/a", 0o100644).unwrap();
        let written = fs.write("/a", b"hello", 0).unwrap();
        assert_eq!(written, 5);
        let mut buf = [0u8; 5];
        let read = fs.read("/a", &mut buf, 0).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.stat("/a").unwrap().size, 5);
        cleanup(&path);
    }

    #[test]
    fn scenario_mkdir_mknod_list() {
        let (mut fs, path) = fresh_fs("mkdir_list");
        fs.mkdir("/d", 0o755).unwrap();
        fs.mknod("/d/f", 0o100644).unwrap();
        assert_eq!(fs.list("/d"), vec!["f".to_owned()]);
        cleanup(&path);
    }

    #[test]
    fn scenario_hardlink_refcount() {
        let (mut fs, path) = fresh_fs("hardlink");
        fs.mknod("/x", 0o100644).unwrap();
        fs.link("/x", "/y").unwrap();
        assert_eq!(fs.stat("/x").unwrap().nlink, 2);
        assert_eq!(fs.stat("/y").unwrap().nlink, 2);
        fs.unlink("/x").unwrap();
        assert_eq!(fs.stat("/y").unwrap().nlink, 1);
        assert!(matches!(fs.stat("/x"), Err(Error::NotFound)));
        cleanup(&path);
    }

    #[test]
    fn scenario_write_then_truncate() {
        let (mut fs, path) = fresh_fs("truncate");
        fs.mknod("/a", 0o100644).unwrap();
        let data = vec![0x42u8; 8192];
        fs.write("/a", &data, 0).unwrap();
        fs.truncate("/a", 100).unwrap();
        assert_eq!(fs.stat("/a").unwrap().size, 100);
        cleanup(&path);
    }

    #[test]
    fn scenario_rename_round_trip() {
        let (mut fs, path) = fresh_fs("rename");
        fs.mknod("/a", 0o100644).unwrap();
        let ino = fs.stat("/a").unwrap().ino;
        fs.rename("/a", "/b").unwrap();
        assert!(matches!(
            path::tree_lookup(&fs.image, "/a"),
            Err(Error::NotFound)
        ));
        assert_eq!(fs.stat("/b").unwrap().ino, ino);
        cleanup(&path);
    }

    #[test]
    fn scenario_rmdir_guards_emptiness() {
        let (mut fs, path) = fresh_fs("rmdir");
        fs.mkdir("/d", 0o755).unwrap();
        fs.mknod("/d/f", 0o100644).unwrap();
        assert!(matches!(fs.rmdir("/d"), Err(Error::NotEmpty)));
        fs.unlink("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        assert!(matches!(fs.stat("/d"), Err(Error::NotFound)));
        cleanup(&path);
    }

    #[test]
    fn mknod_rejects_existing_path() {
        let (mut fs, path) = fresh_fs("exists");
        fs.mknod("/a", 0o100644).unwrap();
        assert!(matches!(fs.mknod("/a", 0o100644), Err(Error::AlreadyExists)));
        cleanup(&path);
    }

    #[test]
    fn read_past_eof_short_reads() {
        let (mut fs, path) = fresh_fs("eof");
        fs.mknod("/a", 0o100644).unwrap();
        fs.write("/a", b"hi", 0).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(fs.read("/a", &mut buf, 2).unwrap(), 0);
        assert_eq!(fs.read("/a", &mut buf, 5).unwrap(), 0);
        cleanup(&path);
    }

    #[test]
    fn chmod_preserves_type_bits() {
        let (mut fs, path) = fresh_fs("chmod");
        fs.mknod("/a", 0o100644).unwrap();
        fs.chmod("/a", 0o600).unwrap();
        let mode = fs.stat("/a").unwrap().mode;
        assert_eq!(mode & 0o170000, 0o100000);
        assert_eq!(mode & 0o7777, 0o600);
        cleanup(&path);
    }

    #[test]
    fn boundary_exactly_one_block_uses_no_indirect() {
        let (mut fs, path) = fresh_fs("boundary_one_block");
        fs.mknod("/a", 0o100644).unwrap();
        fs.write("/a", &vec![1u8; 4096], 0).unwrap();
        let ino = fs.inode_of("/a").unwrap();
        let node = inode::get_inode(&fs.image, ino).unwrap();
        assert_ne!(node.block, 0);
        assert_eq!(node.indirect, 0);
        cleanup(&path);
    }

    #[test]
    fn boundary_one_byte_past_block_needs_indirect() {
        let (mut fs, path) = fresh_fs("boundary_indirect");
        fs.mknod("/a", 0o100644).unwrap();
        fs.write("/a", &vec![1u8; 4097], 0).unwrap();
        let ino = fs.inode_of("/a").unwrap();
        let node = inode::get_inode(&fs.image, ino).unwrap();
        assert_ne!(node.indirect, 0);
        cleanup(&path);
    }
}
