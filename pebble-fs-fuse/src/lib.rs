//! 宿主侧的块设备驱动：
//! 以普通文件或一段内存模拟扇区设备，供镜像打包与集成测试使用。

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::{BlockDevice, Sector, SECTOR_SIZE};

/// 文件即设备：镜像文件的每512字节当一个扇区
pub struct BlockFile {
    file: Mutex<File>,
    sectors: u32,
}

impl BlockFile {
    pub fn new(file: File, sectors: u32) -> Self {
        Self {
            file: Mutex::new(file),
            sectors,
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: u32, buf: &mut Sector) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn write_sector(&self, sector: u32, buf: &Sector) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}

/// 内存即设备，测试专用
pub struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    pub fn new(sectors: u32) -> Self {
        Self(Mutex::new(vec![0; sectors as usize * SECTOR_SIZE]))
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: u32, buf: &mut Sector) {
        let data = self.0.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: u32, buf: &Sector) {
        let mut data = self.0.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }

    fn sector_count(&self) -> u32 {
        (self.0.lock().unwrap().len() / SECTOR_SIZE) as u32
    }
}
