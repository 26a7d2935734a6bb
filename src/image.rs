//! Image surface (§4.1): a 1 MB backing file, memory-mapped as a writable region
//! and sliced into 256 fixed-size 4 KB blocks.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;

use crate::raw::{BLOCK_COUNT, BLOCK_SIZE};

/// Total size of the image, in bytes.
pub const IMAGE_SIZE: usize = BLOCK_COUNT * BLOCK_SIZE;

/// A memory-mapped backing image.
///
/// Owns the mapping for its lifetime; `Drop` unmaps it, so a [`crate::Filesystem`]
/// going out of scope never leaks the mapping even if the caller never tears it
/// down explicitly.
pub struct Image {
    ptr: *mut u8,
}

// The image is not shared across threads (§5); `Filesystem` wraps it and is used
// strictly single-threaded by one caller at a time.
unsafe impl Send for Image {}

impl Image {
    /// Opens or creates the backing file at `path`, extends it to exactly
    /// [`IMAGE_SIZE`] bytes, and maps it into the process address space as a
    /// writable, shared region.
    pub fn init(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(IMAGE_SIZE as u64)?;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                IMAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // The mapping keeps the pages valid independently of the fd; `file` can be
        // dropped (closing the descriptor) once `mmap` has succeeded.
        Ok(Self { ptr: ptr as *mut u8 })
    }

    /// Returns a read-only view of block `i`.
    ///
    /// Panics if `i >= `[`crate::raw::BLOCK_COUNT`].
    pub fn get_block(&self, i: usize) -> &[u8; BLOCK_SIZE] {
        assert!(i < BLOCK_COUNT, "block index {i} out of range");
        unsafe { &*(self.ptr.add(i * BLOCK_SIZE) as *const [u8; BLOCK_SIZE]) }
    }

    /// Mutable counterpart of [`Image::get_block`].
    pub fn get_block_mut(&mut self, i: usize) -> &mut [u8; BLOCK_SIZE] {
        assert!(i < BLOCK_COUNT, "block index {i} out of range");
        unsafe { &mut *(self.ptr.add(i * BLOCK_SIZE) as *mut [u8; BLOCK_SIZE]) }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, IMAGE_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tinyfs_test_{}_{}", std::process::id(), name))
    }

    #[test]
    fn init_creates_exact_size() {
        let path = temp_path("init_size");
        {
            let _img = Image::init(&path).unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), IMAGE_SIZE as u64);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn writes_are_visible_through_get_block() {
        let path = temp_path("roundtrip");
        {
            let mut img = Image::init(&path).unwrap();
            img.get_block_mut(5)[0] = 0xAB;
            assert_eq!(img.get_block(5)[0], 0xAB);
            assert_eq!(img.get_block(6)[0], 0);
        }
        std::fs::remove_file(&path).unwrap();
    }
}
