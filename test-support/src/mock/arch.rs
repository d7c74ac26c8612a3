//! 架构相关操作的 Mock 实现
//!
//! 用一个原子布尔值模拟 `RFLAGS.IF`。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// x86-64 `RFLAGS.IF`
pub const FLAG_IF: usize = 0x200;

/// Mock 架构操作
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    /// 关中断的累计次数，用于断言某段代码确实在关中断下执行
    pub disable_count: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            disable_count: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.disable_count.fetch_add(1, Ordering::SeqCst);
        if self.interrupt_state.swap(false, Ordering::SeqCst) {
            FLAG_IF
        } else {
            0
        }
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state
            .store(flags & FLAG_IF != 0, Ordering::SeqCst);
    }

    pub fn interrupt_enable_bit(&self) -> usize {
        FLAG_IF
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_state.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disable_count.load(Ordering::SeqCst)
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
