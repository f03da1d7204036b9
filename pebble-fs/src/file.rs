//! # 文件句柄层
//!
//! 句柄是绑在一个索引节点上的游标。同一节点可以同时存在多个句柄，
//! 彼此独立推进读写位置；节点本身由缓存层去重共享。
//!
//! 所有方法都假定调用者已持有全局文件系统锁，
//! 由进程层([`crate::ProcessFs`])统一加锁。

use alloc::sync::Arc;

use spin::Mutex;

use crate::cache::{Inode, InodeCache};
use crate::pfs::PebbleFileSystem;

pub struct File {
    entry: Arc<Mutex<Inode>>,
    /// 字节粒度的读写位置
    pos: usize,
    /// 本句柄是否占用着一次拒写
    denied: bool,
}

impl File {
    pub(crate) fn new(entry: Arc<Mutex<Inode>>) -> Self {
        Self {
            entry,
            pos: 0,
            denied: false,
        }
    }

    /// 同一节点上的新句柄，游标归零
    pub(crate) fn reopen(&self) -> Self {
        Self::new(InodeCache::reopen(&self.entry))
    }

    #[inline]
    pub(crate) fn entry(&self) -> &Arc<Mutex<Inode>> {
        &self.entry
    }

    #[inline]
    pub(crate) fn sector(&self) -> u32 {
        self.entry.lock().sector()
    }

    #[inline]
    pub(crate) fn length(&self) -> usize {
        self.entry.lock().length()
    }

    /// 从当前位置读，推进游标
    pub(crate) fn read(&mut self, fs: &PebbleFileSystem, buf: &mut [u8]) -> usize {
        let n = self.read_at(fs, self.pos, buf);
        self.pos += n;
        n
    }

    /// 从指定位置读，不动游标
    pub(crate) fn read_at(&self, fs: &PebbleFileSystem, offset: usize, buf: &mut [u8]) -> usize {
        self.entry.lock().read_at(offset, buf, &fs.device)
    }

    /// 在当前位置写，推进游标
    pub(crate) fn write(&mut self, fs: &mut PebbleFileSystem, buf: &[u8]) -> isize {
        let n = self.write_at(fs, self.pos, buf);
        if n > 0 {
            self.pos += n as usize;
        }
        n
    }

    /// 在指定位置写，不动游标
    pub(crate) fn write_at(&self, fs: &mut PebbleFileSystem, offset: usize, buf: &[u8]) -> isize {
        let PebbleFileSystem {
            free_map, device, ..
        } = fs;
        self.entry.lock().write_at(offset, buf, free_map, device)
    }

    /// 游标可以越过文件末尾；后续写入会把空洞填零
    #[inline]
    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub(crate) fn tell(&self) -> usize {
        self.pos
    }

    /// 占用一次拒写。每个句柄至多一次。
    pub(crate) fn deny_write(&mut self) -> bool {
        if self.denied {
            return false;
        }
        self.denied = true;
        self.entry.lock().deny_write();
        true
    }

    /// 归还本句柄占用的拒写
    pub(crate) fn allow_write(&mut self) -> bool {
        if !self.denied {
            return false;
        }
        self.denied = false;
        self.entry.lock().allow_write();
        true
    }

    /// 关闭句柄，归还引用；持有的拒写一并归还
    pub(crate) fn close(mut self, fs: &mut PebbleFileSystem) {
        self.allow_write();

        let File { entry, .. } = self;
        let PebbleFileSystem {
            free_map,
            device,
            inodes,
        } = fs;
        inodes.close(entry, free_map, device);
    }
}
