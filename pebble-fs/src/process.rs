//! # 进程层
//!
//! 每个进程持有自己的工作目录与打开文件表，
//! 表项把单调递增的文件描述符映射到句柄上。
//! 描述符`0`/`1`留给系统调用层的stdin/stdout，文件描述符从`2`起分配。
//!
//! 这里就是暴露给系统调用层的操作面。
//! 每个操作对全局文件系统锁加锁一次，持有到操作结束，
//! 因此任意单个操作看到并产出的都是一致的持久状态。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;
use spin::Mutex;

use crate::dir::Dir;
use crate::file::File;
use crate::layout::{DiskInode, InodeKind};
use crate::path::Path;
use crate::pfs::PebbleFileSystem;

/// 首个可分配的文件描述符
pub const FD_BASE: usize = 2;

/// 描述符背后的句柄：文件或目录
pub enum Handle {
    File(File),
    /// 目录句柄自带readdir游标
    Dir(Dir),
}

struct ProcessFile {
    fd: usize,
    handle: Handle,
}

/// 一个进程的文件系统环境
pub struct ProcessFs {
    fs: Arc<Mutex<PebbleFileSystem>>,
    /// 工作目录；空表示根目录
    cwd: Option<Dir>,
    fd_next: usize,
    files: Vec<ProcessFile>,
}

impl ProcessFs {
    pub fn new(fs: Arc<Mutex<PebbleFileSystem>>) -> Self {
        Self {
            fs,
            cwd: None,
            fd_next: FD_BASE,
            files: Vec::new(),
        }
    }

    /// 所挂载的文件系统，即全局文件系统锁
    #[inline]
    pub fn fs(&self) -> &Arc<Mutex<PebbleFileSystem>> {
        &self.fs
    }

    /// 建立一个预扩展到`size`字节的普通文件
    pub fn create(&mut self, path: &str, size: usize) -> bool {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let Ok(mut dir) = fs.walk(self.cwd.as_ref(), path, false) else {
            return false;
        };
        let name = path.base_name();

        let mut success = false;
        if let Some(sector) = fs.free_map.allocate(1) {
            let created = {
                let PebbleFileSystem {
                    free_map, device, ..
                } = fs;
                DiskInode::create(sector, size, InodeKind::File, free_map, device)
            };
            if created && dir.add(fs, name, sector, false).is_ok() {
                success = true;
            } else {
                fs.discard_inode(sector);
            }
        }

        dir.close(fs);
        success
    }

    /// 删除文件或空目录。节点的物理释放推迟到最后一个引用关闭。
    pub fn remove(&mut self, path: &str) -> bool {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let Ok(mut dir) = fs.walk(self.cwd.as_ref(), path, false) else {
            return false;
        };
        let result = dir.remove(fs, path.base_name());
        dir.close(fs);

        if let Err(e) = result {
            debug!("remove {path:?} failed: {e:?}");
            return false;
        }
        true
    }

    /// 打开文件或目录，返回新描述符。
    /// basename为空(如`/`或`a/b/`)时打开目录自身。
    pub fn open(&mut self, path: &str) -> Option<usize> {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let dir = fs.walk(self.cwd.as_ref(), path, false).ok()?;
        let name = path.base_name();

        let handle = if name.is_empty() {
            Handle::Dir(dir)
        } else {
            let resolved = dir.lookup(fs, name).map(|sector| {
                let entry = fs.open_inode(sector);
                let is_dir = entry.lock().is_dir();
                if is_dir {
                    Handle::Dir(Dir::from_entry(entry))
                } else {
                    Handle::File(File::new(entry))
                }
            });
            dir.close(fs);
            resolved?
        };

        let fd = self.fd_next;
        self.fd_next += 1;
        self.files.push(ProcessFile { fd, handle });
        Some(fd)
    }

    /// 读`fd`至多`buf.len()`字节，返回实际读到的字节数。
    /// 对目录描述符请用[`Self::readdir`]。
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> isize {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => file.read(fs, buf) as isize,
            _ => -1,
        }
    }

    /// 写`fd`。返回实际写入的字节数；
    /// 节点拒写时为`0`，扩展失败时为`-1`。
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> isize {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => file.write(fs, buf),
            _ => -1,
        }
    }

    /// 游标可以seek到文件末尾之外；之后的写入把空洞填零
    pub fn seek(&mut self, fd: usize, pos: usize) -> bool {
        let _guard = self.fs.lock();

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => {
                file.seek(pos);
                true
            }
            _ => false,
        }
    }

    pub fn tell(&self, fd: usize) -> Option<usize> {
        let _guard = self.fs.lock();

        match self.files.iter().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => Some(file.tell()),
            _ => None,
        }
    }

    pub fn filesize(&self, fd: usize) -> isize {
        let _guard = self.fs.lock();

        match self.files.iter().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => file.length() as isize,
            _ => -1,
        }
    }

    pub fn close(&mut self, fd: usize) -> bool {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let Some(index) = self.files.iter().position(|pf| pf.fd == fd) else {
            return false;
        };
        match self.files.remove(index).handle {
            Handle::File(file) => file.close(fs),
            Handle::Dir(dir) => dir.close(fs),
        }
        true
    }

    /// 新建子目录，`..`指向所在目录
    pub fn mkdir(&mut self, path: &str) -> bool {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let Ok(mut dir) = fs.walk(self.cwd.as_ref(), path, false) else {
            return false;
        };
        let name = path.base_name();

        let mut success = false;
        if let Some(sector) = fs.free_map.allocate(1) {
            if Dir::create(fs, sector, dir.sector()) && dir.add(fs, name, sector, true).is_ok() {
                success = true;
            } else {
                fs.discard_inode(sector);
            }
        }

        dir.close(fs);
        success
    }

    /// 切换工作目录。旧目录被归还，新目录保持打开，
    /// 这层引用同时让"删除使用中的目录"的闸门生效。
    pub fn chdir(&mut self, path: &str) -> bool {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        let Ok(dir) = fs.walk(self.cwd.as_ref(), path, true) else {
            return false;
        };
        if let Some(old) = self.cwd.take() {
            old.close(fs);
        }
        self.cwd = Some(dir);
        true
    }

    /// 目录遍历前进一步，跳过空槽位与`.`/`..`
    pub fn readdir(&mut self, fd: usize) -> Option<String> {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::Dir(dir),
                ..
            }) => dir.read_next(fs),
            _ => None,
        }
    }

    pub fn isdir(&self, fd: usize) -> bool {
        let _guard = self.fs.lock();

        matches!(
            self.files.iter().find(|pf| pf.fd == fd),
            Some(ProcessFile {
                handle: Handle::Dir(_),
                ..
            })
        )
    }

    /// 描述符背后的索引节点编号，即节点所在扇区
    pub fn inumber(&self, fd: usize) -> isize {
        let _guard = self.fs.lock();

        match self.files.iter().find(|pf| pf.fd == fd) {
            Some(pf) => match &pf.handle {
                Handle::File(file) => file.sector() as isize,
                Handle::Dir(dir) => dir.sector() as isize,
            },
            None => -1,
        }
    }

    /// 在`fd`关闭或`allow_write`之前，封死对节点的一切写入
    pub fn deny_write(&mut self, fd: usize) -> bool {
        let _guard = self.fs.lock();

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => file.deny_write(),
            _ => false,
        }
    }

    pub fn allow_write(&mut self, fd: usize) -> bool {
        let _guard = self.fs.lock();

        match self.files.iter_mut().find(|pf| pf.fd == fd) {
            Some(ProcessFile {
                handle: Handle::File(file),
                ..
            }) => file.allow_write(),
            _ => false,
        }
    }

    /// 进程退出：关掉所有描述符，归还工作目录
    pub fn release_all(&mut self) {
        let mut guard = self.fs.lock();
        let fs = &mut *guard;

        for pf in self.files.drain(..) {
            match pf.handle {
                Handle::File(file) => file.close(fs),
                Handle::Dir(dir) => dir.close(fs),
            }
        }
        if let Some(cwd) = self.cwd.take() {
            cwd.close(fs);
        }
    }
}

impl Drop for ProcessFs {
    fn drop(&mut self) {
        self.release_all();
    }
}
