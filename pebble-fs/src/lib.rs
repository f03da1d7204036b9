//! # pebble-fs
//!
//! 教学用的索引节点式文件系统：在平坦的定长扇区设备之上，
//! 提供变长文件与层级目录。
//!
//! 整体架构，自上而下：
//!
//! 1. 进程层：每进程的工作目录与文件描述符表，即系统调用面
//! 2. 路径解析与目录层：把 `/a/b/c` 走成目录记录的查找
//! 3. 文件句柄层：带读写游标的字节粒度读写
//! 4. 索引节点缓存层：同一扇区的多次打开合并为一个内存项
//! 5. 磁盘数据结构层：索引节点的扩展引擎与空闲扇区位图
//! 6. 块设备驱动层：读写扇区的接口
//!
//! 所有顶层操作都持有全局文件系统锁，操作之间全序化。

#![no_std]

extern crate alloc;

mod cache;
mod dir;
mod error;
mod file;
mod free_map;
pub mod layout;
mod path;
mod pfs;
mod process;

pub use block_dev::{BlockDevice, Sector, SECTOR_SIZE};

pub use self::cache::Inode;
pub use self::dir::Dir;
pub use self::error::Error;
pub use self::file::File;
pub use self::free_map::{FreeMap, FREE_MAP_SECTORS, FREE_MAP_START};
pub use self::pfs::PebbleFileSystem;
pub use self::process::{Handle, ProcessFs, FD_BASE};

/// 合法索引节点的标识
pub const MAGIC: u32 = 0x5042_4653;

/// 每扇区的位数
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

/// 根目录的索引节点扇区：引导扇区与空闲位图之后的第一个扇区
pub const ROOT_SECTOR: u32 = FREE_MAP_START + FREE_MAP_SECTORS;

/// 目录项名字的最大字节数
pub const NAME_MAX_LEN: usize = 14;

/// 单文件最大长度：(12 + 128 + 128·128) 个数据扇区
pub const MAX_LEN: usize =
    (layout::DIRECT_COUNT + layout::INDIRECT_PTRS + layout::INDIRECT_PTRS.pow(2)) * SECTOR_SIZE;

/// 容纳 `len` 字节需要的数据扇区数
#[inline]
pub(crate) fn sectors_for(len: usize) -> usize {
    len.div_ceil(SECTOR_SIZE)
}
