//! Directory layer (§4.4): a directory inode's data blocks read as a packed
//! array of fixed 64-byte name/inode records.

use crate::bitmap::bytes_to_blocks;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::inode::{self, get_inode};
use crate::raw::{overlay_array, overlay_array_mut, DirEntryRaw, InodeRaw, DIR_ENTRIES_PER_BLOCK};

/// `bytes_to_blocks(size) * 64`, the number of entry slots a directory's
/// currently-allocated blocks provide, live or empty.
pub fn max_entries(node: &InodeRaw) -> usize {
    bytes_to_blocks(node.size as u64) as usize * DIR_ENTRIES_PER_BLOCK
}

fn entries_in_block(image: &Image, bnum: usize) -> &[DirEntryRaw; DIR_ENTRIES_PER_BLOCK] {
    unsafe { overlay_array(image.get_block(bnum)) }
}

fn entries_in_block_mut(image: &mut Image, bnum: usize) -> &mut [DirEntryRaw; DIR_ENTRIES_PER_BLOCK] {
    unsafe { overlay_array_mut(image.get_block_mut(bnum)) }
}

/// Linear scan for `name`; returns its inode number, or `None` if absent.
pub fn lookup(image: &Image, node: &InodeRaw, name: &str) -> Option<u32> {
    for idx in 0..max_entries(node) {
        let (block_idx, slot) = (idx / DIR_ENTRIES_PER_BLOCK, idx % DIR_ENTRIES_PER_BLOCK);
        let bnum = inode::inode_get_bnum(image, node, block_idx as u64)?;
        let entry = &entries_in_block(image, bnum)[slot];
        if !entry.is_empty() && entry.name_str() == name {
            return Some(entry.inum);
        }
    }
    None
}

/// Inserts `(name, inum)` into directory `dir_i`: reuses the first empty slot, or
/// grows the directory by exactly one block if none is free.
pub fn put(image: &mut Image, dir_i: usize, name: &str, inum: u32) -> Result<()> {
    if name.is_empty() || name.len() >= 48 {
        return Err(Error::NameTooLong);
    }
    let node = get_inode(image, dir_i).ok_or(Error::NotFound)?;

    for idx in 0..max_entries(&node) {
        let (block_idx, slot) = (idx / DIR_ENTRIES_PER_BLOCK, idx % DIR_ENTRIES_PER_BLOCK);
        if let Some(bnum) = inode::inode_get_bnum(image, &node, block_idx as u64) {
            if entries_in_block(image, bnum)[slot].is_empty() {
                entries_in_block_mut(image, bnum)[slot].set(name, inum);
                return Ok(());
            }
        }
    }

    let old_size = node.size as u64;
    inode::grow_inode(image, dir_i, old_size + crate::raw::BLOCK_SIZE as u64)?;
    let grown = get_inode(image, dir_i).unwrap();
    let new_block_idx = bytes_to_blocks(old_size);
    let bnum = inode::inode_get_bnum(image, &grown, new_block_idx).expect("just-grown block must exist");
    entries_in_block_mut(image, bnum)[0].set(name, inum);
    Ok(())
}

/// Zeroes the first entry matching `name`. The directory is never shrunk.
pub fn delete(image: &mut Image, dir_i: usize, name: &str) -> Result<()> {
    let node = get_inode(image, dir_i).ok_or(Error::NotFound)?;
    for idx in 0..max_entries(&node) {
        let (block_idx, slot) = (idx / DIR_ENTRIES_PER_BLOCK, idx % DIR_ENTRIES_PER_BLOCK);
        let Some(bnum) = inode::inode_get_bnum(image, &node, block_idx as u64) else {
            continue;
        };
        let entry = &entries_in_block(image, bnum)[slot];
        if !entry.is_empty() && entry.name_str() == name {
            entries_in_block_mut(image, bnum)[slot].clear();
            return Ok(());
        }
    }
    Err(Error::NotFound)
}

/// Collects the non-empty entries' names in on-disk order.
pub fn list(image: &Image, node: &InodeRaw) -> Vec<String> {
    let mut names = Vec::new();
    for idx in 0..max_entries(node) {
        let (block_idx, slot) = (idx / DIR_ENTRIES_PER_BLOCK, idx % DIR_ENTRIES_PER_BLOCK);
        let Some(bnum) = inode::inode_get_bnum(image, node, block_idx as u64) else {
            continue;
        };
        let entry = &entries_in_block(image, bnum)[slot];
        if !entry.is_empty() {
            names.push(entry.name_str().to_owned());
        }
    }
    names
}
