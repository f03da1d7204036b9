//! # 索引节点缓存层
//!
//! 进程范围的已打开索引节点表。同一扇区的多次打开合并为同一个内存项，
//! 通过打开计数管理生命周期；`unlink`只设置`removed`标记，
//! 物理释放推迟到最后一个引用关闭时。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::{BlockDevice, Sector};
use spin::Mutex;

use crate::free_map::FreeMap;
use crate::layout::DiskInode;
use crate::SECTOR_SIZE;

/// 内存中的索引节点
pub struct Inode {
    /// 打开此节点的引用数
    open_count: usize,
    /// 已被unlink，最后一次关闭时物理释放
    removed: bool,
    /// 大于0时拒绝一切写入
    deny_write: usize,
    /// 磁盘上的节点内容，长度与索引的唯一权威
    pub(crate) data: DiskInode,
}

/// 已打开索引节点的去重表，按节点所在扇区为键
pub(crate) struct InodeCache {
    open: Vec<Arc<Mutex<Inode>>>,
}

impl InodeCache {
    pub(crate) const fn new() -> Self {
        Self { open: Vec::new() }
    }

    /// 打开扇区`sector`上的索引节点：
    /// 已有内存项则增加其打开计数，否则从磁盘装载。
    pub(crate) fn open(&mut self, sector: u32, device: &Arc<dyn BlockDevice>) -> Arc<Mutex<Inode>> {
        if let Some(entry) = self.open.iter().find(|e| e.lock().sector() == sector) {
            return Self::reopen(entry);
        }

        let data = DiskInode::load(device, sector);
        assert!(data.is_valid(), "inode magic mismatch at sector {sector}");

        let entry = Arc::new(Mutex::new(Inode {
            open_count: 1,
            removed: false,
            deny_write: 0,
            data,
        }));
        self.open.push(entry.clone());
        entry
    }

    /// 再次打开一个已持有的内存项
    pub(crate) fn reopen(entry: &Arc<Mutex<Inode>>) -> Arc<Mutex<Inode>> {
        entry.lock().open_count += 1;
        entry.clone()
    }

    /// 关闭一个引用。计数归零时移出打开表；
    /// 若节点已标记`removed`，释放节点扇区与它的全部数据。
    pub(crate) fn close(
        &mut self,
        entry: Arc<Mutex<Inode>>,
        free_map: &mut FreeMap,
        device: &Arc<dyn BlockDevice>,
    ) {
        let mut inode = entry.lock();
        assert!(inode.open_count > 0);

        inode.open_count -= 1;
        if inode.open_count > 0 {
            return;
        }

        self.open.retain(|e| !Arc::ptr_eq(e, &entry));
        if inode.removed {
            free_map.release(inode.sector(), 1);
            inode.data.free_all(free_map, device);
        }
    }
}

impl Inode {
    #[inline]
    pub fn sector(&self) -> u32 {
        self.data.sector()
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.data.length()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// 标记为待删除；物理释放发生在最后一次关闭
    #[inline]
    pub(crate) fn remove(&mut self) {
        self.removed = true;
    }

    #[inline]
    pub(crate) fn open_count(&self) -> usize {
        self.open_count
    }

    pub(crate) fn deny_write(&mut self) {
        self.deny_write += 1;
        assert!(self.deny_write <= self.open_count);
    }

    pub(crate) fn allow_write(&mut self) {
        assert!(self.deny_write > 0);
        assert!(self.deny_write <= self.open_count);
        self.deny_write -= 1;
    }

    /// 从`offset`读出至多`buf.len()`字节，返回实际读到的字节数；
    /// 越过文件末尾的部分读不到。
    /// 亚扇区的范围经由调用内部的中转缓冲区。
    pub(crate) fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        device: &Arc<dyn BlockDevice>,
    ) -> usize {
        let mut offset = offset;
        let mut size = buf.len();
        let mut bytes_read = 0;

        while size > 0 {
            let Some(sector) = self.data.locate(offset, device) else {
                break;
            };
            let sector_ofs = offset % SECTOR_SIZE;

            // 节点内剩余与扇区内剩余，取小者为本轮上限
            let inode_left = self.data.length() - offset;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = size.min(inode_left).min(sector_left);

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                // 整扇区直接读进调用者缓冲区
                let dest: &mut Sector = (&mut buf[bytes_read..bytes_read + SECTOR_SIZE])
                    .try_into()
                    .unwrap();
                device.read_sector(sector, dest);
            } else {
                let mut bounce: Sector = [0; SECTOR_SIZE];
                device.read_sector(sector, &mut bounce);
                buf[bytes_read..bytes_read + chunk]
                    .copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }

            size -= chunk;
            offset += chunk;
            bytes_read += chunk;
        }

        bytes_read
    }

    /// 从`offset`写入`buf`，返回实际写入的字节数。
    ///
    /// 写入越过文件末尾时先扩展；扩展没到位则返回`-1`。
    /// 节点处于拒写状态时立刻返回`0`。
    pub(crate) fn write_at(
        &mut self,
        offset: usize,
        buf: &[u8],
        free_map: &mut FreeMap,
        device: &Arc<dyn BlockDevice>,
    ) -> isize {
        if self.deny_write > 0 {
            return 0;
        }

        let mut size = buf.len();
        if offset + size > self.data.length() {
            let reached = self.data.extend(offset + size, free_map, device);
            if reached != offset + size {
                return -1;
            }
        }

        let mut offset = offset;
        let mut written = 0;

        while size > 0 {
            let Some(sector) = self.data.locate(offset, device) else {
                break;
            };
            let sector_ofs = offset % SECTOR_SIZE;

            let inode_left = self.data.length() - offset;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = size.min(inode_left).min(sector_left);

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let src: &Sector = (&buf[written..written + SECTOR_SIZE]).try_into().unwrap();
                device.write_sector(sector, src);
            } else {
                let mut bounce: Sector = [0; SECTOR_SIZE];
                // 扇区内在写入范围之外还有有效字节时先读后改，
                // 否则从全零开始
                if sector_ofs > 0 || chunk < sector_left {
                    device.read_sector(sector, &mut bounce);
                }
                bounce[sector_ofs..sector_ofs + chunk]
                    .copy_from_slice(&buf[written..written + chunk]);
                device.write_sector(sector, &bounce);
            }

            size -= chunk;
            offset += chunk;
            written += chunk;
        }

        written as isize
    }
}
