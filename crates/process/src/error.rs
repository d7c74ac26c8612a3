//! 错误类型与系统调用哨兵值

use mm::{FaultError, MmapError};

/// fork / wait / exec 失败时返回给用户的值
pub const PID_ERROR: isize = -1;

/// 被内核终止的进程的退出状态
pub const KILLED_STATUS: i32 = -1;

/// 装载可执行文件失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// 文件不存在或无法打开
    OpenFailed,
    /// ELF 头校验失败
    BadHeader,
    /// 程序头无法读取
    BadProgramHeader,
    /// 需要动态链接（DYNAMIC / INTERP / SHLIB 段）
    DynamicLinking,
    /// LOAD 段的地址、偏移或大小不合法
    BadSegment,
    /// 参数放不进一页用户栈
    ArgumentsTooLong,
    /// 页表或物理帧分配失败
    OutOfMemory,
}

/// 进程操作失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// wait 的目标不是调用者尚未等待过的子进程
    NotChild,
    /// 调度器无法创建新的执行单元
    SpawnFailed,
    /// 子进程复制地址空间或文件表失败
    ForkFailed,
    /// 调用者没有地址空间（例如 exec 失败之后）
    NoAddressSpace,
    /// 装载可执行文件失败
    Load(LoadError),
    /// 文件描述符无效
    BadFd,
    /// 文件描述符已用完
    TooManyFiles,
    /// mmap 被拒绝
    Mmap(MmapError),
    /// 缺页被报告给陷入处理层而没有终止进程
    Fault(FaultError),
    /// 进程已被内核终止
    Killed,
}

impl ProcError {
    /// 转换为系统调用返回值
    pub fn to_errno(self) -> isize {
        PID_ERROR
    }
}

impl From<LoadError> for ProcError {
    fn from(err: LoadError) -> Self {
        ProcError::Load(err)
    }
}

impl From<MmapError> for ProcError {
    fn from(err: MmapError) -> Self {
        ProcError::Mmap(err)
    }
}
