//! 文件系统操作的失败种类。
//! 只在各层之间传递；进程层把它们压平成布尔值或哨兵返回值。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 名字不存在
    NotFound,
    /// 名字已被占用
    Exists,
    /// 路径中途遇到非目录
    NotDirectory,
    /// 对目录做了文件操作
    IsDirectory,
    /// 分配器空间不足或超出最大文件尺寸
    NoSpace,
    /// 节点处于拒写状态
    ReadOnly,
    /// 目录里还有活跃记录，不能删
    NotEmpty,
    /// 目录正被进程持有(工作目录或已打开)
    Busy,
    /// 空路径或非法名字
    BadPath,
    /// 描述符不存在
    BadFd,
}
