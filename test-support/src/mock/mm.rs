//! 内存管理相关的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖）。
//! `mm` 在 `cfg(test)` 下为这些类型实现 `ArchMmOps` / `MmConfig`。

use std::alloc::{alloc_zeroed, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PAGE_SIZE: usize = 4096;

/// Mock 的内存管理架构操作
///
/// 宿主机上“物理地址”就是 [`PhysArena`] 中的真实地址，直接映射为恒等映射。
pub struct MockMmOps {
    tlb_flushes: AtomicUsize,
}

impl MockMmOps {
    pub const fn new() -> Self {
        Self {
            tlb_flushes: AtomicUsize::new(0),
        }
    }

    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }

    pub fn flush_tlb(&self, _vaddr: usize) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tlb_flushes(&self) -> usize {
        self.tlb_flushes.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();

/// Mock 的内存布局
///
/// 数值取自 x86-64 教学内核的常见布局。
pub struct MockMmConfig;

impl MockMmConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    pub fn user_stack_top(&self) -> usize {
        0x4748_0000
    }

    pub fn user_space_end(&self) -> usize {
        0x80_0400_0000
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_CONFIG: MockMmConfig = MockMmConfig::new();

/// 宿主机上的“物理内存”
///
/// 申请一段按页对齐、永不释放的内存，返回 `[start, end)` 供帧分配器初始化。
pub struct PhysArena;

impl PhysArena {
    pub fn leak(pages: usize) -> (usize, usize) {
        let size = pages * PAGE_SIZE;
        let layout = Layout::from_size_align(size, PAGE_SIZE).expect("arena layout");
        // SAFETY: layout 大小非零
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "host allocation failed");
        let start = ptr as usize;
        (start, start + size)
    }
}
