use std::mem;

use pebble_fs::layout::{DirRecord, DiskInode};
use pebble_fs::SECTOR_SIZE;

#[test]
fn on_disk_sizes() {
    assert_eq!(SECTOR_SIZE, mem::size_of::<DiskInode>());
    assert_eq!(DirRecord::SIZE, mem::size_of::<DirRecord>());
}
