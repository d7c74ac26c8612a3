//! 不携带数据的自旋锁
//!
//! 获取锁之前先关闭本地中断，释放锁之后再恢复，
//! 这样持锁期间不会被本 CPU 上的中断处理程序抢占而死锁。

use crate::intr_guard::IntrGuard;
use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 自旋锁，不可重入。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个未上锁的实例。
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// 关中断后自旋直到取得锁。
    pub fn lock(&self) -> RawSpinLockGuard<'_> {
        let intr = IntrGuard::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            // 只读等待，避免在缓存行上反复写
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        RawSpinLockGuard { lock: self, _intr: intr }
    }

    /// 尝试获取一次；失败时中断状态立即恢复。
    pub fn try_lock(&self) -> Option<RawSpinLockGuard<'_>> {
        let intr = IntrGuard::new();
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RawSpinLockGuard { lock: self, _intr: intr })
    }

    /// 锁当前是否被占用（仅供调试与断言）。
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// [`RawSpinLock`] 的 RAII 保护器。
///
/// 字段按声明顺序析构：先在 Drop 中释放锁标志，再由 `_intr` 恢复中断。
pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
    _intr: IntrGuard,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
