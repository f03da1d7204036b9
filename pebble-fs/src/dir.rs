//! # 目录层
//!
//! 目录就是一个内容为定宽记录数组的普通文件，叠在文件句柄层之上。
//! 空闲记录先于文件扩展被复用；记录的追加以一条记录为步长。
//!
//! 0号记录是保留的`..`回指记录，查找`..`时自然命中；
//! `.`不落盘，查找时直接解析为目录自身。

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::cache::Inode;
use crate::error::Error;
use crate::file::File;
use crate::layout::{DirRecord, DiskInode, InodeKind, PARENT_NAME};
use crate::pfs::PebbleFileSystem;
use crate::NAME_MAX_LEN;

/// 目录句柄，内含独立的遍历游标
pub struct Dir {
    file: File,
}

impl Dir {
    /// 打开扇区`sector`上的目录。
    /// 非目录节点或已标记删除的目录都打不开。
    pub(crate) fn open(fs: &mut PebbleFileSystem, sector: u32) -> Option<Self> {
        let entry = fs.open_inode(sector);
        {
            let inode = entry.lock();
            if !inode.is_dir() || inode.is_removed() {
                drop(inode);
                fs.close_inode(entry);
                return None;
            }
        }
        Some(Self {
            file: File::new(entry),
        })
    }

    /// 基于已打开的节点建立目录句柄
    pub(crate) fn from_entry(entry: Arc<Mutex<Inode>>) -> Self {
        Self {
            file: File::new(entry),
        }
    }

    /// 同一目录上的新句柄，遍历游标归零
    pub(crate) fn reopen(&self) -> Self {
        Self {
            file: self.file.reopen(),
        }
    }

    #[inline]
    pub(crate) fn entry(&self) -> &Arc<Mutex<Inode>> {
        self.file.entry()
    }

    #[inline]
    pub(crate) fn sector(&self) -> u32 {
        self.file.sector()
    }

    pub(crate) fn close(self, fs: &mut PebbleFileSystem) {
        self.file.close(fs);
    }

    /// 建立全新的目录：分配索引节点，装入指向父目录的`..`记录。
    /// 挂进父目录由调用者负责。
    pub(crate) fn create(fs: &mut PebbleFileSystem, sector: u32, parent_sector: u32) -> bool {
        {
            let PebbleFileSystem {
                free_map, device, ..
            } = fs;
            if !DiskInode::create(
                sector,
                DirRecord::SIZE,
                InodeKind::Directory,
                free_map,
                device,
            ) {
                return false;
            }
        }

        let entry = fs.open_inode(sector);
        let record = DirRecord::parent(parent_sector);
        let written = {
            let PebbleFileSystem {
                free_map, device, ..
            } = fs;
            entry.lock().write_at(0, record.as_bytes(), free_map, device)
        };
        fs.close_inode(entry);

        written == DirRecord::SIZE as isize
    }

    /// 线性扫描，首个匹配生效。
    /// `.`解析为目录自身，`..`由0号回指记录命中。
    pub(crate) fn lookup(&self, fs: &PebbleFileSystem, name: &str) -> Option<u32> {
        if name == "." {
            return Some(self.sector());
        }
        self.find(fs, name).map(|(_, record)| record.inode_sector())
    }

    /// 新建目录项。名字非法返回`BadPath`，重名返回`Exists`，
    /// 目录无法再增长返回`NoSpace`。
    pub(crate) fn add(
        &mut self,
        fs: &mut PebbleFileSystem,
        name: &str,
        inode_sector: u32,
        is_dir: bool,
    ) -> Result<(), Error> {
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            return Err(Error::BadPath);
        }
        if self.lookup(fs, name).is_some() {
            return Err(Error::Exists);
        }

        // 先复用空闲槽位，没有才把目录加长一条记录
        let slot = self.free_slot(fs).unwrap_or_else(|| self.file.length());

        let record = DirRecord::new(name, inode_sector, is_dir);
        if self.file.write_at(fs, slot, record.as_bytes()) != DirRecord::SIZE as isize {
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// 删除目录项并把目标节点标记为待删除。
    ///
    /// 目标是目录时有两道闸门：被进程持有(打开计数大于1)的不能删，
    /// 还有活跃记录的不能删。失败时目录不发生任何变化。
    pub(crate) fn remove(&mut self, fs: &mut PebbleFileSystem, name: &str) -> Result<(), Error> {
        if name.is_empty() || name == "." || name == PARENT_NAME {
            return Err(Error::BadPath);
        }

        let (offset, mut record) = self.find(fs, name).ok_or(Error::NotFound)?;

        let entry = fs.open_inode(record.inode_sector());
        let gate = {
            let inode = entry.lock();
            if inode.is_dir() {
                if inode.open_count() > 1 {
                    // 打开计数大于1：本次打开之外还有人持有，
                    // 多半是某个进程的工作目录
                    Err(Error::Busy)
                } else if has_live_records(&inode, fs) {
                    Err(Error::NotEmpty)
                } else {
                    Ok(())
                }
            } else {
                Ok(())
            }
        };
        if let Err(e) = gate {
            fs.close_inode(entry);
            return Err(e);
        }

        record.erase();
        if self.file.write_at(fs, offset, record.as_bytes()) != DirRecord::SIZE as isize {
            fs.close_inode(entry);
            return Err(Error::NoSpace);
        }

        entry.lock().remove();
        fs.close_inode(entry);
        Ok(())
    }

    /// 从本句柄的游标继续遍历，返回下一个名字。
    /// 空槽位与`.`/`..`被跳过；游标按记录逐条推进。
    pub(crate) fn read_next(&mut self, fs: &PebbleFileSystem) -> Option<String> {
        let mut record = DirRecord::default();
        while self.file.read(fs, record.as_bytes_mut()) == DirRecord::SIZE {
            if record.in_use() && record.name() != "." && record.name() != PARENT_NAME {
                return Some(String::from(record.name()));
            }
        }
        None
    }

    /// 扫描出名字对应的`(记录偏移, 记录)`
    fn find(&self, fs: &PebbleFileSystem, name: &str) -> Option<(usize, DirRecord)> {
        let mut record = DirRecord::default();
        let size = self.file.length();

        for offset in (0..size).step_by(DirRecord::SIZE) {
            assert_eq!(
                self.file.read_at(fs, offset, record.as_bytes_mut()),
                DirRecord::SIZE
            );
            if record.in_use() && record.name() == name {
                return Some((offset, record));
            }
        }

        None
    }

    /// 第一个可复用的空闲槽位
    fn free_slot(&self, fs: &PebbleFileSystem) -> Option<usize> {
        let mut record = DirRecord::default();
        let size = self.file.length();

        for offset in (0..size).step_by(DirRecord::SIZE) {
            assert_eq!(
                self.file.read_at(fs, offset, record.as_bytes_mut()),
                DirRecord::SIZE
            );
            if !record.in_use() {
                return Some(offset);
            }
        }

        None
    }
}

/// 除`..`回指记录外是否还有在用的记录
fn has_live_records(inode: &Inode, fs: &PebbleFileSystem) -> bool {
    let mut record = DirRecord::default();
    let size = inode.length();

    for offset in (DirRecord::SIZE..size).step_by(DirRecord::SIZE) {
        if inode.read_at(offset, record.as_bytes_mut(), &fs.device) == DirRecord::SIZE
            && record.in_use()
        {
            return true;
        }
    }

    false
}
