//! 进程控制块
//!
//! 状态机：`Created → Running → Exiting → Zombie → Reaped`。
//!
//! 父子进程之间的三次握手都用子进程 PCB 上的信号量完成：
//!
//! | 信号量 | up | down |
//! |---|---|---|
//! | `fork_done` | 子进程复制完成或失败 | 父进程的 fork |
//! | `exit_notify` | 子进程写好退出状态 | 父进程的 wait |
//! | `reap_permit` | 父进程读走退出状态（或父进程先退出） | 子进程的 exit |
//!
//! 每个信号量至多被 up 一次。

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use mm::{AddressSpace, OpenFile, PageTableInner};
use sync::{Semaphore, SpinLock};

use crate::fd_table::FdTable;

/// 进程ID
pub type Pid = u32;

/// 进程状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// 已创建，尚未拥有地址空间
    Created,
    /// 拥有地址空间，可以运行用户代码
    Running,
    /// 正在退出，资源尚未释放完
    Exiting,
    /// 已释放资源，等待父进程回收
    Zombie,
    /// 已被回收
    Reaped,
}

/// 子进程眼中的父进程
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentLink {
    /// 没有父进程：父进程已退出，或已经 wait 过
    None,
    /// 父进程的 pid
    Parent(Pid),
    /// fork 复制失败，由父进程负责放行回收
    Failed,
}

/// 进程控制块
pub struct Process<PT: PageTableInner> {
    pid: Pid,
    name: String,
    pub(crate) parent: SpinLock<ParentLink>,
    state: SpinLock<ProcessState>,
    exit_status: AtomicI32,
    killed: AtomicBool,
    is_user: AtomicBool,
    pub(crate) fork_done: Semaphore,
    pub(crate) exit_notify: Semaphore,
    pub(crate) reap_permit: Semaphore,
    pub(crate) space: SpinLock<Option<AddressSpace<PT>>>,
    pub(crate) fds: FdTable,
    pub(crate) exe: SpinLock<Option<Arc<OpenFile>>>,
}

impl<PT: PageTableInner> Process<PT> {
    pub(crate) fn new(pid: Pid, name: &str, parent: ParentLink, max_fds: usize) -> Self {
        Self {
            pid,
            name: String::from(name),
            parent: SpinLock::new(parent),
            state: SpinLock::new(ProcessState::Created),
            exit_status: AtomicI32::new(0),
            killed: AtomicBool::new(false),
            is_user: AtomicBool::new(false),
            fork_done: Semaphore::new(0),
            exit_notify: Semaphore::new(0),
            reap_permit: Semaphore::new(0),
            space: SpinLock::new(None),
            fds: FdTable::new(max_fds),
            exe: SpinLock::new(None),
        }
    }

    /// 进程ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 进程名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前状态
    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// 父进程关系
    pub fn parent(&self) -> ParentLink {
        *self.parent.lock()
    }

    /// 退出状态；只有在进程进入 [`ProcessState::Exiting`] 之后才有意义
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub(crate) fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
    }

    /// 是否已被内核判定终止
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    /// 是否是用户进程（退出时打印终止信息）
    pub fn is_user(&self) -> bool {
        self.is_user.load(Ordering::Acquire)
    }

    pub(crate) fn mark_user(&self) {
        self.is_user.store(true, Ordering::Release);
    }

    /// 是否拥有地址空间
    pub fn has_address_space(&self) -> bool {
        self.space.lock().is_some()
    }

    /// 可执行文件句柄
    pub fn executable(&self) -> Option<Arc<OpenFile>> {
        self.exe.lock().clone()
    }

    /// 文件描述符表
    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    /// 在持锁状态下访问地址空间
    pub fn with_space<R>(&self, f: impl FnOnce(&mut AddressSpace<PT>) -> R) -> Option<R> {
        self.space.lock().as_mut().map(f)
    }
}
