//! # 磁盘数据结构层
//!
//! 表示磁盘文件系统的数据结构：索引节点与目录记录。
//! 所有持久对象都对齐到整扇区，扇区编号`0`表示"无块"。

mod dir_record;
mod inode;

pub use self::dir_record::DirRecord;
pub(crate) use self::dir_record::PARENT_NAME;
pub use self::inode::{DiskInode, InodeKind, DIRECT_COUNT, INDIRECT_PTRS};
