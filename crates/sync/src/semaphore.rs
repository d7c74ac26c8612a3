//! 计数信号量
//!
//! 父子进程之间的 fork 完成、退出通知、回收许可三种握手都是
//! 初值为 0、至多被 up 一次的信号量。等待方如何让出 CPU 由调用者决定：
//! [`Semaphore::down_with`] 在每次取不到许可时调用传入的闭包
//! （通常是调度器的 yield）。

use crate::spin_lock::SpinLock;
use core::hint;

/// 计数信号量。
#[derive(Debug)]
pub struct Semaphore {
    value: SpinLock<usize>,
}

impl Semaphore {
    /// 以给定初值创建信号量。
    pub const fn new(value: usize) -> Self {
        Semaphore {
            value: SpinLock::new(value),
        }
    }

    /// 释放一个许可。
    pub fn up(&self) {
        *self.value.lock() += 1;
    }

    /// 若有许可则取走一个并返回 `true`，否则立即返回 `false`。
    pub fn try_down(&self) -> bool {
        let mut value = self.value.lock();
        if *value > 0 {
            *value -= 1;
            true
        } else {
            false
        }
    }

    /// 取得一个许可；拿不到时调用 `wait` 后重试。
    pub fn down_with(&self, mut wait: impl FnMut()) {
        while !self.try_down() {
            wait();
        }
    }

    /// 自旋等待直到取得一个许可。
    pub fn down(&self) {
        self.down_with(hint::spin_loop);
    }

    /// 当前许可数。
    pub fn value(&self) -> usize {
        *self.value.lock()
    }
}
