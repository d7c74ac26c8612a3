//! 外部协作者接口
//!
//! 由内核的调度器、文件系统和控制台驱动实现，创建 [`crate::ProcessManager`] 时注入。

use crate::process::Pid;
use crate::trap_frame::TrapFrame;
use alloc::boxed::Box;
use alloc::sync::Arc;
use mm::MmInode;

/// 调度器接口
pub trait Scheduler: Send + Sync {
    /// 创建一个新的可调度执行单元，以 `pid` 标识并在其中运行 `entry`
    ///
    /// 无法创建时返回 `false`，`entry` 不会被执行。
    fn spawn(&self, pid: Pid, name: &str, entry: Box<dyn FnOnce() + Send>) -> bool;

    /// 当前执行单元所属的进程；内核启动上下文返回 `None`
    fn current_pid(&self) -> Option<Pid>;

    /// 让出 CPU
    fn yield_now(&self);

    /// 以 `frame` 进入用户态，直到用户程序终止，返回它请求的退出状态
    ///
    /// 调用前当前进程的地址空间已被激活。
    fn enter_user(&self, frame: TrapFrame) -> i32;
}

/// 文件系统接口
pub trait FileSystem: Send + Sync {
    /// 按路径打开文件
    fn open(&self, path: &str) -> Option<Arc<dyn MmInode>>;
}

/// 内核标准输出
pub trait Console: Send + Sync {
    /// 输出一段文本
    fn write_str(&self, s: &str);
}
