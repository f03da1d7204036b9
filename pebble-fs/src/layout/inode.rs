//! 索引节点与扩展引擎
//!
//! 一个索引节点恰好占据一个扇区，描述一个文件的长度、类型与数据扇区索引：
//! - 直接索引：12个扇区编号，每个都指向一个**数据扇区**
//! - 一级间接索引：1个扇区编号，指向一个装有128个数据扇区编号的**索引扇区**
//! - 二级间接索引：1个扇区编号，指向一个装有128个一级索引扇区编号的索引扇区
//!
//! 文件增长是惰性的：写入越过文件末尾时才逐扇区分配，
//! 新数据扇区先清零再暴露给用户。
//!
//! 节点内的计数器(`dir_count`/`indir_*`/`dindir_*`)是"当前未填满容器"
//! 的唯一真相，**不**从文件长度重算；
//! 每个计数器都指向当前容器中最后一个已填充槽位的后一位。

use alloc::sync::Arc;
use core::mem;
use core::ptr;

use block_dev::{BlockDevice, Sector};
use log::warn;

use crate::free_map::FreeMap;
use crate::sectors_for;
use crate::MAGIC;
use crate::SECTOR_SIZE;

/// 直接索引的扇区数
pub const DIRECT_COUNT: usize = 12;
/// 一级间接索引扇区数
const INDIRECT_COUNT: usize = 1;
/// 二级间接索引扇区数
const DINDIRECT_COUNT: usize = 1;
/// 一个索引扇区可容纳的编号数：4字节编号，512字节扇区
pub const INDIRECT_PTRS: usize = SECTOR_SIZE / 4;

/// 索引扇区：连续的扇区编号，没有头部
type IndirectSector = [u32; INDIRECT_PTRS];

/// 磁盘上的索引节点，恰好一个扇区
#[repr(C)]
pub struct DiskInode {
    /// 合法性校验
    magic: u32,
    /// 自身所在扇区，便于原地改写
    self_sector: u32,
    /// 文件长度(字节)
    length: u32,
    kind: InodeKind,

    /// 已填充的直接槽位数
    dir_count: u32,
    direct: [u32; DIRECT_COUNT],

    /// 已启用的一级间接扇区数
    indir_count: u32,
    /// 当前一级间接扇区内已填充的槽位数
    indir_fill: u32,
    indirect: [u32; INDIRECT_COUNT],

    /// 已启用的二级间接扇区数
    dindir_count: u32,
    /// 当前二级间接扇区内已填充的一级槽位数
    dindir_l1_fill: u32,
    /// 当前一级子扇区内已填充的数据槽位数
    dindir_l2_fill: u32,
    dindirect: [u32; DINDIRECT_COUNT],

    reserved: [u32; 104],
}

// 索引节点的结构必须恰好一个扇区
const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File = 0,
    Directory = 1,
}

impl DiskInode {
    fn new(self_sector: u32, kind: InodeKind) -> Self {
        Self {
            magic: MAGIC,
            self_sector,
            length: 0,
            kind,
            dir_count: 0,
            direct: [0; DIRECT_COUNT],
            indir_count: 0,
            indir_fill: 0,
            indirect: [0; INDIRECT_COUNT],
            dindir_count: 0,
            dindir_l1_fill: 0,
            dindir_l2_fill: 0,
            dindirect: [0; DINDIRECT_COUNT],
            reserved: [0; 104],
        }
    }

    /// 在扇区`sector`上建立长度为`length`字节的新索引节点并写盘。
    /// 分配中途失败(空间不足)则返回`false`。
    pub fn create(
        sector: u32,
        length: usize,
        kind: InodeKind,
        free_map: &mut FreeMap,
        device: &Arc<dyn BlockDevice>,
    ) -> bool {
        let mut inode = Self::new(sector, kind);
        inode.extend(length, free_map, device) == length
    }

    pub fn load(device: &Arc<dyn BlockDevice>, sector: u32) -> Self {
        let mut buf: Sector = [0; SECTOR_SIZE];
        device.read_sector(sector, &mut buf);
        unsafe { mem::transmute(buf) }
    }

    /// 原地改写自身所在扇区
    pub fn flush(&self, device: &Arc<dyn BlockDevice>) {
        let buf = unsafe { &*ptr::from_ref(self).cast::<Sector>() };
        device.write_sector(self.self_sector, buf);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn sector(&self) -> u32 {
        self.self_sector
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// 返回承载字节偏移`pos`的数据扇区；
    /// `pos`越过文件末尾时返回空。
    ///
    /// 间接区域按需读取索引扇区，不做缓存。
    pub fn locate(&self, pos: usize, device: &Arc<dyn BlockDevice>) -> Option<u32> {
        if pos >= self.length as usize {
            return None;
        }

        let index = pos / SECTOR_SIZE;
        if index < DIRECT_COUNT {
            return Some(self.direct[index]);
        }

        // 一级间接区域
        let index = index - DIRECT_COUNT;
        if index < INDIRECT_COUNT * INDIRECT_PTRS {
            let ptrs = read_ptrs(device, self.indirect[index / INDIRECT_PTRS]);
            return Some(ptrs[index % INDIRECT_PTRS]);
        }

        // 二级间接区域
        let index = index - INDIRECT_COUNT * INDIRECT_PTRS;
        if index >= DINDIRECT_COUNT * INDIRECT_PTRS * INDIRECT_PTRS {
            // 越过了最大文件尺寸
            return None;
        }
        let l1 = read_ptrs(device, self.dindirect[index / (INDIRECT_PTRS * INDIRECT_PTRS)]);
        let index = index % (INDIRECT_PTRS * INDIRECT_PTRS);
        let l2 = read_ptrs(device, l1[index / INDIRECT_PTRS]);
        Some(l2[index % INDIRECT_PTRS])
    }

    /// 把文件扩展到`new_length`字节，返回实际达到的长度。
    ///
    /// 只在分配器失败或越过最大文件尺寸时短于`new_length`；
    /// 无论从哪个出口返回，索引节点都已改写回盘。
    /// 不支持收缩。
    pub fn extend(
        &mut self,
        new_length: usize,
        free_map: &mut FreeMap,
        device: &Arc<dyn BlockDevice>,
    ) -> usize {
        assert!(new_length >= self.length as usize);

        // 留在同一末尾扇区内的扩展不分配，只改长度
        let wanted = sectors_for(new_length) - sectors_for(self.length as usize);
        let short = self.grow(wanted, free_map, device);

        let reached = if short == 0 {
            new_length
        } else {
            warn!(
                "inode {}: extension stopped {} sectors short of {} bytes",
                self.self_sector, short, new_length
            );
            new_length.min(self.data_sectors() * SECTOR_SIZE)
        };

        self.length = reached as u32;
        self.flush(device);
        reached
    }

    /// 三区域增长状态机。返回未能分配的扇区数。
    fn grow(
        &mut self,
        mut remaining: usize,
        free_map: &mut FreeMap,
        device: &Arc<dyn BlockDevice>,
    ) -> usize {
        if remaining == 0 {
            return 0;
        }

        // 直接区域
        while (self.dir_count as usize) < DIRECT_COUNT {
            let Some(sector) = free_map.allocate(1) else {
                return remaining;
            };
            self.direct[self.dir_count as usize] = sector;
            self.dir_count += 1;
            zero_sector(device, sector);
            remaining -= 1;
            if remaining == 0 {
                return 0;
            }
        }

        // 一级间接区域
        while self.indir_data() < INDIRECT_COUNT * INDIRECT_PTRS {
            // 还没有间接扇区，或当前间接扇区已填满
            let mut ptrs: IndirectSector;
            if self.indir_count == 0 || self.indir_fill as usize == INDIRECT_PTRS {
                let Some(sector) = free_map.allocate(1) else {
                    return remaining;
                };
                self.indirect[self.indir_count as usize] = sector;
                self.indir_count += 1;
                self.indir_fill = 0;
                ptrs = [0; INDIRECT_PTRS];
            } else {
                ptrs = read_ptrs(device, self.indirect[self.indir_count as usize - 1]);
            }
            let container = self.indirect[self.indir_count as usize - 1];

            while (self.indir_fill as usize) < INDIRECT_PTRS {
                let Some(sector) = free_map.allocate(1) else {
                    write_ptrs(device, container, &ptrs);
                    return remaining;
                };
                ptrs[self.indir_fill as usize] = sector;
                self.indir_fill += 1;
                zero_sector(device, sector);
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }

            // 本次调用对该容器的最后一次改动之后才写盘
            write_ptrs(device, container, &ptrs);
            if remaining == 0 {
                return 0;
            }
        }

        // 二级间接区域
        while self.dindir_data() < DINDIRECT_COUNT * INDIRECT_PTRS * INDIRECT_PTRS {
            let mut l1: IndirectSector;
            if self.dindir_count == 0
                || (self.dindir_l1_fill as usize == INDIRECT_PTRS
                    && self.dindir_l2_fill as usize == INDIRECT_PTRS)
            {
                let Some(sector) = free_map.allocate(1) else {
                    return remaining;
                };
                self.dindirect[self.dindir_count as usize] = sector;
                self.dindir_count += 1;
                self.dindir_l1_fill = 0;
                l1 = [0; INDIRECT_PTRS];
            } else {
                l1 = read_ptrs(device, self.dindirect[self.dindir_count as usize - 1]);
            }
            let outer = self.dindirect[self.dindir_count as usize - 1];

            while (self.dindir_l1_fill as usize) < INDIRECT_PTRS
                || (self.dindir_l2_fill as usize) < INDIRECT_PTRS
            {
                // 还没有一级子扇区，或当前子扇区已填满
                let mut l2: IndirectSector;
                if self.dindir_l1_fill == 0 || self.dindir_l2_fill as usize == INDIRECT_PTRS {
                    let Some(sector) = free_map.allocate(1) else {
                        write_ptrs(device, outer, &l1);
                        return remaining;
                    };
                    l1[self.dindir_l1_fill as usize] = sector;
                    self.dindir_l1_fill += 1;
                    self.dindir_l2_fill = 0;
                    l2 = [0; INDIRECT_PTRS];
                } else {
                    l2 = read_ptrs(device, l1[self.dindir_l1_fill as usize - 1]);
                }
                let inner = l1[self.dindir_l1_fill as usize - 1];

                while (self.dindir_l2_fill as usize) < INDIRECT_PTRS {
                    let Some(sector) = free_map.allocate(1) else {
                        write_ptrs(device, inner, &l2);
                        write_ptrs(device, outer, &l1);
                        return remaining;
                    };
                    l2[self.dindir_l2_fill as usize] = sector;
                    self.dindir_l2_fill += 1;
                    zero_sector(device, sector);
                    remaining -= 1;
                    if remaining == 0 {
                        break;
                    }
                }

                write_ptrs(device, inner, &l2);
                if remaining == 0 {
                    break;
                }
            }

            write_ptrs(device, outer, &l1);
            if remaining == 0 {
                return 0;
            }
        }

        // 全部区域耗尽：越过最大文件尺寸
        remaining
    }

    /// 按二级间接→一级间接→直接的逆序，
    /// 释放此节点拥有的所有数据扇区与索引扇区。
    /// 节点自身所在扇区由索引节点缓存释放，不在此处。
    pub fn free_all(&mut self, free_map: &mut FreeMap, device: &Arc<dyn BlockDevice>) {
        while self.dindir_count != 0 {
            let l1 = read_ptrs(device, self.dindirect[self.dindir_count as usize - 1]);

            while self.dindir_l1_fill != 0 {
                let l2 = read_ptrs(device, l1[self.dindir_l1_fill as usize - 1]);

                while self.dindir_l2_fill != 0 {
                    free_map.release(l2[self.dindir_l2_fill as usize - 1], 1);
                    self.dindir_l2_fill -= 1;
                }

                free_map.release(l1[self.dindir_l1_fill as usize - 1], 1);
                self.dindir_l1_fill -= 1;
                if self.dindir_l1_fill != 0 {
                    // 前一个子扇区必然是满的
                    self.dindir_l2_fill = INDIRECT_PTRS as u32;
                }
            }

            free_map.release(self.dindirect[self.dindir_count as usize - 1], 1);
            self.dindir_count -= 1;
            if self.dindir_count != 0 {
                self.dindir_l1_fill = INDIRECT_PTRS as u32;
                self.dindir_l2_fill = INDIRECT_PTRS as u32;
            }
        }

        while self.indir_count != 0 {
            let ptrs = read_ptrs(device, self.indirect[self.indir_count as usize - 1]);

            while self.indir_fill != 0 {
                free_map.release(ptrs[self.indir_fill as usize - 1], 1);
                self.indir_fill -= 1;
            }

            free_map.release(self.indirect[self.indir_count as usize - 1], 1);
            self.indir_count -= 1;
            if self.indir_count != 0 {
                self.indir_fill = INDIRECT_PTRS as u32;
            }
        }

        while self.dir_count != 0 {
            free_map.release(self.direct[self.dir_count as usize - 1], 1);
            self.dir_count -= 1;
        }
    }

    /// 由计数器推出的数据扇区占用量
    #[inline]
    pub fn data_sectors(&self) -> usize {
        self.dir_count as usize + self.indir_data() + self.dindir_data()
    }

    /// 一级间接区域承载的数据扇区数
    fn indir_data(&self) -> usize {
        if self.indir_count == 0 {
            return 0;
        }
        (self.indir_count as usize - 1) * INDIRECT_PTRS + self.indir_fill as usize
    }

    /// 二级间接区域承载的数据扇区数
    fn dindir_data(&self) -> usize {
        if self.dindir_count == 0 {
            return 0;
        }
        let mut total = (self.dindir_count as usize - 1) * INDIRECT_PTRS * INDIRECT_PTRS;
        if self.dindir_l1_fill > 0 {
            total +=
                (self.dindir_l1_fill as usize - 1) * INDIRECT_PTRS + self.dindir_l2_fill as usize;
        }
        total
    }
}

fn read_ptrs(device: &Arc<dyn BlockDevice>, sector: u32) -> IndirectSector {
    let mut buf: Sector = [0; SECTOR_SIZE];
    device.read_sector(sector, &mut buf);
    unsafe { mem::transmute(buf) }
}

fn write_ptrs(device: &Arc<dyn BlockDevice>, sector: u32, ptrs: &IndirectSector) {
    let buf = unsafe { &*ptr::from_ref(ptrs).cast::<Sector>() };
    device.write_sector(sector, buf);
}

fn zero_sector(device: &Arc<dyn BlockDevice>, sector: u32) {
    static ZEROS: Sector = [0; SECTOR_SIZE];
    device.write_sector(sector, &ZEROS);
}
