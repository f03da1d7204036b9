//! # 空闲扇区位图
//!
//! 记录整个设备的扇区分配情况，常驻内存；
//! `open`时从保留区间读入，`close`时写回持久化。
//! 位图本身占据设备开头`1..=16`号扇区的固定区间。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::{BlockDevice, Sector};
use log::debug;

use crate::SECTOR_BITS;
use crate::SECTOR_SIZE;

/// 位图区间的起始扇区：0号扇区保留给引导
pub const FREE_MAP_START: u32 = 1;
/// 位图区间占据的扇区数
pub const FREE_MAP_SECTORS: u32 = 16;

/// 每扇区装载的bit组数
const GROUPS_PER_SECTOR: usize = SECTOR_SIZE / 8;

/// 空闲扇区分配器
pub struct FreeMap {
    /// 分配情况，一位一扇区
    groups: Vec<u64>,
    /// 受管辖的设备扇区数
    sectors: u32,
}

impl FreeMap {
    /// 位图可管辖的最大扇区数
    pub const CAPACITY: usize = FREE_MAP_SECTORS as usize * SECTOR_BITS;

    /// 全新的位图：保留区间(引导扇区、位图自身、根目录节点)预先标记为占用
    pub fn create(device: &Arc<dyn BlockDevice>) -> Self {
        let mut map = Self::empty(device);
        for sector in 0..=crate::ROOT_SECTOR {
            map.set(sector);
        }
        map
    }

    /// 从保留区间读入已持久化的位图
    pub fn open(device: &Arc<dyn BlockDevice>) -> Self {
        let mut map = Self::empty(device);

        let mut buf: Sector = [0; SECTOR_SIZE];
        for index in 0..FREE_MAP_SECTORS as usize {
            device.read_sector(FREE_MAP_START + index as u32, &mut buf);
            for (group, bytes) in buf.chunks_exact(8).enumerate() {
                map.groups[index * GROUPS_PER_SECTOR + group] =
                    u64::from_le_bytes(bytes.try_into().unwrap());
            }
        }

        map
    }

    /// 写回保留区间
    pub fn close(&self, device: &Arc<dyn BlockDevice>) {
        let mut buf: Sector = [0; SECTOR_SIZE];
        for index in 0..FREE_MAP_SECTORS as usize {
            for group in 0..GROUPS_PER_SECTOR {
                buf[group * 8..(group + 1) * 8]
                    .copy_from_slice(&self.groups[index * GROUPS_PER_SECTOR + group].to_le_bytes());
            }
            device.write_sector(FREE_MAP_START + index as u32, &buf);
        }
        debug!("free map persisted, {} sectors in use", self.allocated_sectors());
    }

    fn empty(device: &Arc<dyn BlockDevice>) -> Self {
        let sectors = device.sector_count();
        // 超出位图管辖能力的设备属于结构性错误
        assert!(
            sectors as usize <= Self::CAPACITY,
            "device too large for the free map"
        );
        assert!(sectors > crate::ROOT_SECTOR);

        Self {
            groups: vec![0; FREE_MAP_SECTORS as usize * GROUPS_PER_SECTOR],
            sectors,
        }
    }

    /// 分配`n`个连续扇区，返回首扇区编号；空间不足则返回空。
    /// 扩展引擎总是逐扇区(`n = 1`)调用。
    pub fn allocate(&mut self, n: usize) -> Option<u32> {
        if n == 1 {
            // 快路径：找还有0位的bit组
            let (group, bits) = self
                .groups
                .iter()
                .enumerate()
                .find(|(_, &bits)| bits != u64::MAX)?;
            let sector = (group * 64) as u32 + bits.trailing_ones();
            if sector >= self.sectors {
                return None;
            }
            self.set(sector);
            return Some(sector);
        }

        let mut run = 0;
        for sector in 0..self.sectors {
            if self.test(sector) {
                run = 0;
                continue;
            }
            run += 1;
            if run == n {
                let first = sector + 1 - n as u32;
                for s in first..=sector {
                    self.set(s);
                }
                return Some(first);
            }
        }
        None
    }

    /// 释放从`sector`开始的`n`个扇区
    pub fn release(&mut self, sector: u32, n: usize) {
        for s in sector..sector + n as u32 {
            // 编号一定得有对应的位
            assert!(self.test(s), "releasing a free sector");
            self.clear(s);
        }
    }

    /// 当前已占用的扇区数
    pub fn allocated_sectors(&self) -> usize {
        self.groups.iter().map(|bits| bits.count_ones() as usize).sum()
    }

    #[inline]
    fn test(&self, sector: u32) -> bool {
        self.groups[sector as usize / 64] & (1 << (sector % 64)) != 0
    }

    #[inline]
    fn set(&mut self, sector: u32) {
        self.groups[sector as usize / 64] |= 1 << (sector % 64);
    }

    #[inline]
    fn clear(&mut self, sector: u32) {
        self.groups[sector as usize / 64] &= !(1 << (sector % 64));
    }
}
