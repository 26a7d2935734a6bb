//! Bitmap allocator (§4.2): the two free-pool bitmaps embedded in block 0, plus
//! block allocation/release. Inode allocation lives in [`crate::inode`] because it
//! also has to initialize the inode record; it reuses [`get`]/[`put`] here for the
//! inode bitmap itself.

use crate::image::Image;
use crate::raw::{BLOCK_BITMAP_OFFSET, BLOCK_COUNT, BLOCK_SIZE, FIRST_DATA_BLOCK, INODE_BITMAP_OFFSET};

/// Returns bit `i` of `bitmap` (0 or 1).
pub fn get(bitmap: &[u8], i: usize) -> u8 {
    (bitmap[i / 8] >> (i % 8)) & 1
}

/// Sets bit `i` of `bitmap` to `v` (0 or 1).
pub fn put(bitmap: &mut [u8], i: usize, v: u8) {
    if v != 0 {
        bitmap[i / 8] |= 1 << (i % 8);
    } else {
        bitmap[i / 8] &= !(1 << (i % 8));
    }
}

/// `ceil(n / BLOCK_SIZE)`, with `bytes_to_blocks(0) == 0`.
pub fn bytes_to_blocks(n: u64) -> u64 {
    n.div_ceil(BLOCK_SIZE as u64)
}

/// Returns the live view of the block bitmap (32 bytes, 256 bits) inside block 0.
pub fn block_bitmap(image: &mut Image) -> &mut [u8] {
    &mut image.get_block_mut(0)[BLOCK_BITMAP_OFFSET..BLOCK_BITMAP_OFFSET + BLOCK_COUNT / 8]
}

/// Returns the live view of the inode bitmap (16 bytes, 128 bits) inside block 0.
pub fn inode_bitmap(image: &mut Image) -> &mut [u8] {
    &mut image.get_block_mut(0)[INODE_BITMAP_OFFSET..INODE_BITMAP_OFFSET + crate::raw::INODE_COUNT / 8]
}

/// Sets bits 0 and 1 of the block bitmap, reserving block 0 (bitmaps) and block 1
/// (inode table). Called once from `storage_init` on a fresh image.
pub fn reserve_metadata_blocks(image: &mut Image) {
    let bitmap = block_bitmap(image);
    put(bitmap, 0, 1);
    put(bitmap, 1, 1);
}

/// Scans the block bitmap for the lowest-index clear bit within `[2, 256)`, marks
/// it used, zeros the block, and returns its index. Returns `None` when full.
pub fn alloc_block(image: &mut Image) -> Option<usize> {
    let bitmap = block_bitmap(image);
    let index = (FIRST_DATA_BLOCK..BLOCK_COUNT).find(|&i| get(bitmap, i) == 0)?;
    put(block_bitmap(image), index, 1);
    image.get_block_mut(index).fill(0);
    Some(index)
}

/// Clears bit `i` in the block bitmap. Does NOT re-zero the block's contents.
pub fn free_block(image: &mut Image, i: usize) {
    put(block_bitmap(image), i, 0);
}
