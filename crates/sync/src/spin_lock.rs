//! 自旋锁封装
//!
//! 在 [`RawSpinLock`] 之上保护一份数据。

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use crate::raw_spin_lock::{RawSpinLock, RawSpinLockGuard};

/// 保护数据 `T` 的自旋锁。
///
/// 持锁期间本地中断关闭，因此临界区应当短小；
/// 同一线程重复 `lock()` 会死锁。
///
/// # 示例
/// ```ignore
/// let counter = SpinLock::new(0);
/// *counter.lock() += 1;
/// ```
#[derive(Debug)]
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: 对 data 的所有访问都经过 raw 的互斥
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// 用初始数据创建自旋锁。
    pub const fn new(data: T) -> Self {
        SpinLock {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取锁并返回数据的访问保护器。
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let raw = self.raw.lock();
        SpinLockGuard {
            _raw: raw,
            // SAFETY: 已持有 raw，独占访问 data
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 尝试获取锁。
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw.try_lock().map(|raw| SpinLockGuard {
            _raw: raw,
            // SAFETY: 同上
            data: unsafe { &mut *self.data.get() },
        })
    }

    /// 拥有 `&mut self` 时无需加锁即可访问数据。
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// 取出内部数据。
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// 锁当前是否被占用（仅供调试与断言）。
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// [`SpinLock`] 的 RAII 保护器，离开作用域时释放锁。
pub struct SpinLockGuard<'a, T> {
    _raw: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}
