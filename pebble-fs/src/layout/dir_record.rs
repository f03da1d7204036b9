//! 目录记录
//!
//! 目录的内容就是一个普通文件，装着定宽记录的密集数组。
//! 每个目录的0号记录是保留的`..`回指记录，指向父目录的索引节点扇区；
//! 根目录的父目录是它自己。

use core::ptr;
use core::slice;
use core::str;

use crate::NAME_MAX_LEN;

/// 目录里的一条定宽记录
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct DirRecord {
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX_LEN + 1],
    in_use: bool,
    is_dir: bool,
    _pad: [u8; 3],
}

/// 父目录回指记录的名字
pub(crate) const PARENT_NAME: &str = "..";

const _: () = assert!(core::mem::size_of::<DirRecord>() == DirRecord::SIZE);

impl DirRecord {
    /// 记录大小恒为24字节
    pub const SIZE: usize = 24;

    pub fn new(name: &str, inode_sector: u32, is_dir: bool) -> Self {
        debug_assert!(!name.is_empty() && name.len() <= NAME_MAX_LEN);

        let bytes = name.as_bytes();
        let mut name = [0; NAME_MAX_LEN + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            inode_sector,
            name,
            in_use: true,
            is_dir,
            _pad: [0; 3],
        }
    }

    /// `..`回指记录，永远占据0号槽位
    #[inline]
    pub fn parent(parent_sector: u32) -> Self {
        Self::new(PARENT_NAME, parent_sector, true)
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap();
        str::from_utf8(&self.name[..len]).unwrap()
    }

    #[inline]
    pub fn inode_sector(&self) -> u32 {
        self.inode_sector
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// 抹除记录，槽位可被复用
    #[inline]
    pub fn erase(&mut self) {
        self.in_use = false;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
