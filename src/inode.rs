//! Inode table (§4.3): block 1 reinterpreted as 128 fixed inode records, their
//! lifecycle, and the direct/single-indirect block-pointer arithmetic.

use std::mem::size_of;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmap::{self, bytes_to_blocks};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::raw::{overlay_array, overlay_array_mut, InodeRaw, BLOCK_SIZE, INODE_COUNT, INODE_TABLE_BLOCK};

/// Directory type bit within `mode` (§3).
pub const S_IFDIR: u32 = 0o040000;

/// Number of block-number entries an indirect block holds.
const INDIRECT_ENTRIES: usize = BLOCK_SIZE / size_of::<u32>();

pub(crate) fn now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}

fn current_ids() -> (u16, u16) {
    unsafe { (libc::getuid() as u16, libc::getgid() as u16) }
}

fn inode_table(image: &Image) -> &[InodeRaw; INODE_COUNT] {
    unsafe { overlay_array(image.get_block(INODE_TABLE_BLOCK)) }
}

fn inode_table_mut(image: &mut Image) -> &mut [InodeRaw; INODE_COUNT] {
    unsafe { overlay_array_mut(image.get_block_mut(INODE_TABLE_BLOCK)) }
}

/// Returns a copy of inode `i`'s record, or `None` if out of range.
pub fn get_inode(image: &Image, i: usize) -> Option<InodeRaw> {
    inode_table(image).get(i).copied()
}

/// Applies `f` to inode `i`'s live record and returns its result, or `None` if out
/// of range.
fn with_inode_mut<R>(image: &mut Image, i: usize, f: impl FnOnce(&mut InodeRaw) -> R) -> Option<R> {
    inode_table_mut(image).get_mut(i).map(f)
}

fn read_indirect_entry(image: &Image, block: usize, slot: usize) -> u32 {
    let entries: &[u32; INDIRECT_ENTRIES] = unsafe { overlay_array(image.get_block(block)) };
    entries[slot]
}

fn write_indirect_entry(image: &mut Image, block: usize, slot: usize, value: u32) {
    let entries: &mut [u32; INDIRECT_ENTRIES] = unsafe { overlay_array_mut(image.get_block_mut(block)) };
    entries[slot] = value;
}

/// Finds the lowest clear bit in the inode bitmap, marks it used, zeroes the
/// record, and initializes `refs`, `uid`/`gid`, and timestamps. `mode` is left at
/// zero for the caller to set. Returns `None` when the inode table is full.
pub fn alloc_inode(image: &mut Image) -> Option<usize> {
    let bitmap = bitmap::inode_bitmap(image);
    let index = (0..INODE_COUNT).find(|&i| bitmap::get(bitmap, i) == 0)?;
    bitmap::put(bitmap::inode_bitmap(image), index, 1);

    let ts = now();
    let (uid, gid) = current_ids();
    with_inode_mut(image, index, |node| {
        *node = InodeRaw::default();
        node.refs = 1;
        node.uid = uid;
        node.gid = gid;
        node.atime = ts;
        node.mtime = ts;
    });
    Some(index)
}

/// Releases inode `i`'s data and indirect blocks, zeroes the record, and clears
/// its inode bitmap bit.
///
/// Inode 0 (the root) is never freed regardless of `refs`.
pub fn free_inode(image: &mut Image, i: usize) {
    if i == 0 {
        return;
    }
    let Some(node) = get_inode(image, i) else {
        return;
    };
    if node.block != 0 {
        bitmap::free_block(image, node.block as usize);
    }
    if node.indirect != 0 {
        let bound = (bytes_to_blocks(node.size as u64).saturating_sub(1) as usize).min(INDIRECT_ENTRIES);
        for slot in 0..bound {
            let bnum = read_indirect_entry(image, node.indirect as usize, slot);
            if bnum != 0 {
                bitmap::free_block(image, bnum as usize);
            }
        }
        bitmap::free_block(image, node.indirect as usize);
    }
    with_inode_mut(image, i, |node| *node = InodeRaw::default());
    bitmap::put(bitmap::inode_bitmap(image), i, 0);
}

/// Translates logical file block index `k` to a physical block number, or `None`
/// if that block is unallocated or `k` is out of range.
pub fn inode_get_bnum(image: &Image, node: &InodeRaw, k: u64) -> Option<usize> {
    if k == 0 {
        return (node.block != 0).then_some(node.block as usize);
    }
    let slot = k - 1;
    if slot >= INDIRECT_ENTRIES as u64 || node.indirect == 0 {
        return None;
    }
    let bnum = read_indirect_entry(image, node.indirect as usize, slot as usize);
    (bnum != 0).then_some(bnum as usize)
}

/// Grows inode `i` to `new_size` bytes, allocating and zero-filling new blocks as
/// needed (§4.3). On success, commits `size` and bumps `mtime`. On allocation
/// failure, frees only the one block that could not be placed and returns
/// [`Error::NoSpace`]; partial growth up to that point is not rolled back.
pub fn grow_inode(image: &mut Image, i: usize, new_size: u64) -> Result<()> {
    let node = get_inode(image, i).ok_or(Error::InvalidArgument)?;
    let cur_blocks = bytes_to_blocks(node.size as u64);
    let target_blocks = bytes_to_blocks(new_size);

    for idx in cur_blocks..target_blocks {
        let new_block = bitmap::alloc_block(image).ok_or(Error::NoSpace)?;
        if idx == 0 {
            with_inode_mut(image, i, |node| node.block = new_block as u32);
            continue;
        }
        let mut indirect = get_inode(image, i).unwrap().indirect;
        if indirect == 0 {
            match bitmap::alloc_block(image) {
                Some(ind) => {
                    indirect = ind as u32;
                    with_inode_mut(image, i, |node| node.indirect = indirect);
                }
                None => {
                    bitmap::free_block(image, new_block);
                    return Err(Error::NoSpace);
                }
            }
        }
        write_indirect_entry(image, indirect as usize, (idx - 1) as usize, new_block as u32);
    }

    with_inode_mut(image, i, |node| {
        node.size = new_size as u32;
        node.mtime = now();
    });
    Ok(())
}

/// Shrinks inode `i` to `new_size` bytes, freeing blocks from the highest logical
/// index down to the target count (§4.3). Frees the indirect block too once the
/// target count drops to 1 or fewer. Data retained in the final block past
/// `new_size` is left as-is.
pub fn shrink_inode(image: &mut Image, i: usize, new_size: u64) {
    let Some(node) = get_inode(image, i) else {
        return;
    };
    let cur_blocks = bytes_to_blocks(node.size as u64);
    let target_blocks = bytes_to_blocks(new_size);

    for idx in (target_blocks..cur_blocks).rev() {
        if idx == 0 {
            if node.block != 0 {
                bitmap::free_block(image, node.block as usize);
            }
            with_inode_mut(image, i, |node| node.block = 0);
        } else if node.indirect != 0 {
            let slot = (idx - 1) as usize;
            let bnum = read_indirect_entry(image, node.indirect as usize, slot);
            if bnum != 0 {
                bitmap::free_block(image, bnum as usize);
            }
            write_indirect_entry(image, node.indirect as usize, slot, 0);
        }
    }

    if target_blocks <= 1 && node.indirect != 0 {
        bitmap::free_block(image, node.indirect as usize);
        with_inode_mut(image, i, |node| node.indirect = 0);
    }

    with_inode_mut(image, i, |node| {
        node.size = new_size as u32;
        node.mtime = now();
    });
}

/// Overwrites `mode` outright (used only at creation, where there is no existing
/// type bit to preserve).
pub fn set_mode(image: &mut Image, i: usize, mode: u32) {
    with_inode_mut(image, i, |node| node.mode = mode);
}

/// Replaces the permission bits (low 12 bits) of `mode` while preserving the
/// existing type bits (§4.6 `chmod`).
pub fn chmod(image: &mut Image, i: usize, mode: u32) {
    with_inode_mut(image, i, |node| {
        node.mode = (node.mode & !0o7777) | (mode & 0o7777);
    });
}

/// Overwrites both timestamps with caller-supplied values (§4.6 `set_time`).
pub fn set_times(image: &mut Image, i: usize, atime: i32, mtime: i32) {
    with_inode_mut(image, i, |node| {
        node.atime = atime;
        node.mtime = mtime;
    });
}

/// Stamps `atime` with the current time.
pub fn touch_atime(image: &mut Image, i: usize) {
    let ts = now();
    with_inode_mut(image, i, |node| node.atime = ts);
}

/// Stamps `mtime` with the current time.
pub fn touch_mtime(image: &mut Image, i: usize) {
    let ts = now();
    with_inode_mut(image, i, |node| node.mtime = ts);
}

/// Adds `delta` to `refs` and returns the new value (0 if the inode is out of
/// range, which should not happen for valid callers).
pub fn bump_refs(image: &mut Image, i: usize, delta: i32) -> i32 {
    with_inode_mut(image, i, |node| {
        node.refs += delta;
        node.refs
    })
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::reserve_metadata_blocks;

    fn fresh_image(name: &str) -> Image {
        let path = std::env::temp_dir().join(format!("tinyfs_test_inode_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        let img = Image::init(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        img
    }

    #[test]
    fn alloc_inode_initializes_fields() {
        let mut image = fresh_image("alloc_init");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        let node = get_inode(&image, i).unwrap();
        assert_eq!(node.refs, 1);
        assert_eq!(node.mode, 0);
        assert_eq!(node.size, 0);
        assert_eq!(node.block, 0);
        assert_eq!(node.indirect, 0);
    }

    #[test]
    fn free_inode_zero_is_noop() {
        let mut image = fresh_image("free_zero");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        assert_eq!(i, 0);
        free_inode(&mut image, 0);
        // Bit must still be set; a subsequent alloc must not reuse inode 0.
        let next = alloc_inode(&mut image).unwrap();
        assert_ne!(next, 0);
    }

    #[test]
    fn grow_direct_only_within_one_block() {
        let mut image = fresh_image("grow_direct");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        grow_inode(&mut image, i, 4096).unwrap();
        let node = get_inode(&image, i).unwrap();
        assert_ne!(node.block, 0);
        assert_eq!(node.indirect, 0);
        assert_eq!(inode_get_bnum(&image, &node, 0), Some(node.block as usize));
    }

    #[test]
    fn grow_past_one_block_uses_indirect() {
        let mut image = fresh_image("grow_indirect");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        grow_inode(&mut image, i, 4097).unwrap();
        let node = get_inode(&image, i).unwrap();
        assert_ne!(node.block, 0);
        assert_ne!(node.indirect, 0);
        assert!(inode_get_bnum(&image, &node, 1).is_some());
        assert!(inode_get_bnum(&image, &node, 2).is_none());
    }

    #[test]
    fn shrink_to_one_block_drops_indirect() {
        let mut image = fresh_image("shrink_drop_indirect");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        grow_inode(&mut image, i, 8192).unwrap();
        shrink_inode(&mut image, i, 10);
        let node = get_inode(&image, i).unwrap();
        assert_eq!(node.size, 10);
        assert_eq!(node.indirect, 0);
        assert_ne!(node.block, 0);
    }

    #[test]
    fn shrink_to_zero_frees_direct_block() {
        let mut image = fresh_image("shrink_zero");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        grow_inode(&mut image, i, 100).unwrap();
        shrink_inode(&mut image, i, 0);
        let node = get_inode(&image, i).unwrap();
        assert_eq!(node.block, 0);
        assert_eq!(node.size, 0);
    }

    #[test]
    fn grow_exhaustion_yields_no_space() {
        let mut image = fresh_image("grow_exhaust");
        reserve_metadata_blocks(&mut image);
        let i = alloc_inode(&mut image).unwrap();
        // Far more than the 254 available data blocks can satisfy.
        let err = grow_inode(&mut image, i, 2_000_000).unwrap_err();
        assert!(matches!(err, Error::NoSpace));
    }
}
