//! # 文件系统驱动层
//!
//! 把设备、空闲扇区位图与索引节点缓存攒成一个文件系统实例。
//! 返回的`Arc<Mutex<_>>`就是全局文件系统锁：
//! 每个顶层操作在整个执行期间持有它，操作之间全序化。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use log::info;
use spin::Mutex;

use crate::cache::{Inode, InodeCache};
use crate::dir::Dir;
use crate::error::Error;
use crate::free_map::FreeMap;
use crate::layout::DiskInode;
use crate::path::Path;
use crate::ROOT_SECTOR;

pub struct PebbleFileSystem {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) free_map: FreeMap,
    pub(crate) inodes: InodeCache,
}

impl PebbleFileSystem {
    /// 挂载设备；`format`为真时先格式化。
    pub fn mount(device: Arc<dyn BlockDevice>, format: bool) -> Arc<Mutex<Self>> {
        let fs = if format {
            Self::format(device)
        } else {
            Self::attach(device)
        };
        Arc::new(Mutex::new(fs))
    }

    /// 格式化：建立空闲扇区位图，在固定扇区上建立根目录(父目录是自己)，
    /// 随即持久化位图。
    fn format(device: Arc<dyn BlockDevice>) -> Self {
        info!("formatting file system...");

        let free_map = FreeMap::create(&device);
        let mut fs = Self {
            device,
            free_map,
            inodes: InodeCache::new(),
        };

        assert!(
            Dir::create(&mut fs, ROOT_SECTOR, ROOT_SECTOR),
            "root directory creation failed"
        );
        fs.free_map.close(&fs.device);

        info!("format done");
        fs
    }

    /// 挂载已格式化的设备：读入位图，校验根目录节点
    fn attach(device: Arc<dyn BlockDevice>) -> Self {
        let free_map = FreeMap::open(&device);
        let fs = Self {
            device,
            free_map,
            inodes: InodeCache::new(),
        };

        let root = DiskInode::load(&fs.device, ROOT_SECTOR);
        assert!(
            root.is_valid() && root.is_dir(),
            "no file system on this device"
        );

        info!("file system mounted, {} sectors in use", fs.allocated_sectors());
        fs
    }

    /// 停机：写回位图
    pub fn shutdown(&mut self) {
        self.free_map.close(&self.device);
    }

    /// 分配器当前占用的扇区数
    #[inline]
    pub fn allocated_sectors(&self) -> usize {
        self.free_map.allocated_sectors()
    }

    pub(crate) fn open_inode(&mut self, sector: u32) -> Arc<Mutex<Inode>> {
        self.inodes.open(sector, &self.device)
    }

    pub(crate) fn close_inode(&mut self, entry: Arc<Mutex<Inode>>) {
        let Self {
            free_map,
            device,
            inodes,
        } = self;
        inodes.close(entry, free_map, device);
    }

    pub(crate) fn root_dir(&mut self) -> Dir {
        Dir::open(self, ROOT_SECTOR).expect("root directory is corrupted")
    }

    /// 释放一个创建中途失败的索引节点：
    /// 节点扇区连同已经挂上的数据一起归还
    pub(crate) fn discard_inode(&mut self, sector: u32) {
        let mut data = DiskInode::load(&self.device, sector);
        let Self {
            free_map, device, ..
        } = self;
        if data.is_valid() {
            data.free_all(free_map, device);
        }
        free_map.release(sector, 1);
    }

    /// 沿`path`逐分量下行。绝对路径从根出发，
    /// 相对路径从调用进程的工作目录(缺省为根)出发。
    ///
    /// `include_last`为假时，最后一个分量留给调用者处置
    /// (basename为空则没有这样的分量)。
    /// 中途查找失败、撞上非目录、或解析出的目录已标记删除，都是失败。
    pub(crate) fn walk(
        &mut self,
        cwd: Option<&Dir>,
        path: &str,
        include_last: bool,
    ) -> Result<Dir, Error> {
        if path.is_empty() {
            return Err(Error::BadPath);
        }

        let mut dir = if path.is_absolute() {
            self.root_dir()
        } else {
            match cwd {
                Some(cwd) => cwd.reopen(),
                None => self.root_dir(),
            }
        };

        let walk_all = include_last || path.base_name().is_empty();
        let mut tokens = path.components().peekable();

        while let Some(token) = tokens.next() {
            if tokens.peek().is_none() && !walk_all {
                break;
            }
            if token == "." {
                continue;
            }

            let Some(next) = dir.lookup(self, token) else {
                dir.close(self);
                return Err(Error::NotFound);
            };
            dir.close(self);

            let Some(child) = Dir::open(self, next) else {
                return Err(Error::NotDirectory);
            };
            dir = child;
        }

        // 已标记删除的目录即使仍被打开，也不再可达
        let removed = dir.entry().lock().is_removed();
        if removed {
            dir.close(self);
            return Err(Error::NotFound);
        }
        Ok(dir)
    }
}
