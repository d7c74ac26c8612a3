//! 系统调用层的包装
//!
//! 把 [`ProcessManager`] 的结构化结果转换成用户可见的返回值：
//! 失败的 pid / 状态为 [`PID_ERROR`]，失败的 mmap 为空地址 0。

use alloc::sync::Arc;
use mm::PageTableInner;

use crate::error::PID_ERROR;
use crate::manager::ProcessManager;
use crate::process::Pid;
use crate::trap_frame::TrapFrame;

/// fork：父进程得到子进程的 pid，子进程从同一位置返回 0
pub fn sys_fork<PT: PageTableInner>(
    manager: &Arc<ProcessManager<PT>>,
    name: &str,
    frame: &TrapFrame,
) -> isize {
    match manager.fork(name, frame) {
        Ok(pid) => pid as isize,
        Err(err) => err.to_errno(),
    }
}

/// exec：成功时 `frame` 指向新程序，返回值不会被用户看到
///
/// 失败时调用者已没有地址空间，它被标记为终止，随后以 [`crate::KILLED_STATUS`] 退出。
pub fn sys_exec<PT: PageTableInner>(
    manager: &Arc<ProcessManager<PT>>,
    cmd_line: &str,
    frame: &mut TrapFrame,
) -> isize {
    match manager.exec(cmd_line, frame) {
        Ok(()) => 0,
        Err(err) => {
            manager.kill_current();
            err.to_errno()
        }
    }
}

/// wait：返回子进程的退出状态
pub fn sys_wait<PT: PageTableInner>(manager: &Arc<ProcessManager<PT>>, pid: Pid) -> isize {
    match manager.wait(pid) {
        Ok(status) => status as isize,
        Err(err) => err.to_errno(),
    }
}

/// mmap：返回映射的起始地址，被拒绝时返回 0
pub fn sys_mmap<PT: PageTableInner>(
    manager: &Arc<ProcessManager<PT>>,
    addr: usize,
    length: usize,
    writable: bool,
    fd: usize,
    offset: usize,
) -> usize {
    match manager.mmap(addr, length, writable, fd, offset) {
        Ok(addr) => addr,
        Err(err) => {
            log::debug!("mmap({:#x}, {}, fd {}) rejected: {:?}", addr, length, fd, err);
            0
        }
    }
}

/// munmap：`addr` 必须是一条现存映射的起始地址，否则返回 [`PID_ERROR`]
pub fn sys_munmap<PT: PageTableInner>(manager: &Arc<ProcessManager<PT>>, addr: usize) -> isize {
    if !manager.has_mapping(addr) {
        return PID_ERROR;
    }
    match manager.munmap(addr) {
        Ok(()) => 0,
        Err(err) => err.to_errno(),
    }
}
