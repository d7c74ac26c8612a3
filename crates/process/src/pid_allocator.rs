//! 简单的进程ID分配器实现

use crate::process::Pid;
use core::sync::atomic::{AtomicU32, Ordering};

/// 简单的进程ID分配器。
/// 每次调用 `allocate` 返回唯一的进程ID。
/// 进程ID从 2 开始递增（PID 1 表示创建第一个用户进程的内核上下文）。
#[derive(Debug)]
pub struct PidAllocator {
    next_pid: AtomicU32,
}

impl PidAllocator {
    /// 创建一个新的PidAllocator实例。
    pub const fn new() -> Self {
        PidAllocator {
            next_pid: AtomicU32::new(2),
        }
    }

    /// 分配一个新的进程ID。
    pub fn allocate(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
