//! 物理帧分配器
//!
//! 可用物理内存在初始化时被切成两个池：内核池和用户池（各占一半）。
//! 用户进程的页只从用户池分配，用户池耗尽时由补充页表负责换出，
//! 内核自身的数据结构不会因此被挤占。
//!
//! 每个池用位图跟踪帧的分配状态（0=空闲，1=已分配），
//! 并以上次分配的位置作为下一次查找的起点。
//!
//! [`FrameTracker`] 是单帧的 RAII 包装：`Drop` 时自动归还到所属的池。

use crate::address::{Paddr, PageNum, Ppn, UsizeConvert};
use alloc::vec::Vec;
use bitflags::bitflags;
use lazy_static::lazy_static;
use sync::SpinLock;

bitflags! {
    /// 分配选项
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// 分配后清零；否则内容未定义
        const ZERO = 1 << 0;
    }
}

/// 物理帧来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePool {
    /// 内核池：页表、内核栈等
    Kernel,
    /// 用户池：用户页
    User,
}

/// 物理帧跟踪器
///
/// 被 drop 时所管理的物理帧归还到分配它的池。
#[derive(Debug)]
pub struct FrameTracker {
    ppn: Ppn,
    pool: FramePool,
}

impl FrameTracker {
    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }

    /// 所属的池
    pub fn pool(&self) -> FramePool {
        self.pool
    }

    /// 经直接映射区读取整帧
    pub fn as_bytes(&self) -> &[u8] {
        let va = self.ppn.start_addr().to_vaddr();
        // SAFETY: 帧由本跟踪器独占，直接映射区覆盖全部物理内存
        unsafe { core::slice::from_raw_parts(va.as_usize() as *const u8, page_size()) }
    }

    /// 经直接映射区写入整帧
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let va = self.ppn.start_addr().to_vaddr();
        // SAFETY: 同上，且 &mut self 保证没有其它借用
        unsafe { core::slice::from_raw_parts_mut(va.as_usize() as *mut u8, page_size()) }
    }

    /// 将整帧清零
    pub fn zero(&mut self) {
        self.as_bytes_mut().fill(0);
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        pool_of(self.pool).lock().dealloc(self.ppn);
    }
}

#[inline]
fn page_size() -> usize {
    crate::mm_config().page_size()
}

/// 位图帧分配器，管理 `[start, end)` 之间的物理页。
pub struct FrameAllocator {
    start: Ppn,
    end: Ppn,
    bitmap: Vec<u64>,
    total_frames: usize,
    allocated_count: usize,
    last_alloc_hint: usize,
}

impl FrameAllocator {
    /// 创建一个空的分配器，初始化前任何分配都会失败。
    pub const fn new() -> Self {
        FrameAllocator {
            start: Ppn(0),
            end: Ppn(0),
            bitmap: Vec::new(),
            total_frames: 0,
            allocated_count: 0,
            last_alloc_hint: 0,
        }
    }

    /// 设置可用的物理页范围，之前的分配状态全部丢弃。
    pub fn init(&mut self, start: Ppn, end: Ppn) {
        self.start = start;
        self.end = end;
        self.total_frames = end.as_usize().saturating_sub(start.as_usize());
        self.bitmap = alloc::vec![0u64; self.total_frames.div_ceil(64)];
        self.allocated_count = 0;
        self.last_alloc_hint = 0;
    }

    #[inline]
    fn is_free(&self, idx: usize) -> bool {
        self.bitmap[idx / 64] & (1u64 << (idx % 64)) == 0
    }

    /// 分配一个物理页。
    /// 从上次分配所在的字开始循环查找第一个空闲位。
    pub fn alloc(&mut self) -> Option<Ppn> {
        let words = self.bitmap.len();
        for offset in 0..words {
            let word_idx = (self.last_alloc_hint + offset) % words;
            let word = self.bitmap[word_idx];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let idx = word_idx * 64 + bit;
            if idx >= self.total_frames {
                continue;
            }
            self.bitmap[word_idx] |= 1u64 << bit;
            self.allocated_count += 1;
            self.last_alloc_hint = word_idx;
            return Some(Ppn(self.start.0 + idx));
        }
        None
    }

    /// 归还一个物理页。
    pub fn dealloc(&mut self, ppn: Ppn) {
        debug_assert!(
            ppn >= self.start && ppn < self.end,
            "dealloc: frame out of range"
        );
        let idx = ppn.0 - self.start.0;
        debug_assert!(!self.is_free(idx), "dealloc: double free detected");
        self.bitmap[idx / 64] &= !(1u64 << (idx % 64));
        self.allocated_count -= 1;
    }

    /// 返回 (总帧数, 已分配, 空闲)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.total_frames,
            self.allocated_count,
            self.total_frames - self.allocated_count,
        )
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref KERNEL_POOL: SpinLock<FrameAllocator> = SpinLock::new(FrameAllocator::new());
    static ref USER_POOL: SpinLock<FrameAllocator> = SpinLock::new(FrameAllocator::new());
}

fn pool_of(pool: FramePool) -> &'static SpinLock<FrameAllocator> {
    match pool {
        FramePool::Kernel => &KERNEL_POOL,
        FramePool::User => &USER_POOL,
    }
}

/// 用 `[start_addr, end_addr)` 的物理内存初始化两个池。
///
/// 起始地址向上、结束地址向下取整到页；低半部分归内核池，高半部分归用户池。
pub fn init_frame_allocator(start_addr: usize, end_addr: usize) {
    let start = Ppn::from_addr_ceil(Paddr(start_addr));
    let end = Ppn::from_addr_floor(Paddr(end_addr));
    let total = end.0.saturating_sub(start.0);
    let split = Ppn(start.0 + total / 2);
    KERNEL_POOL.lock().init(start, split);
    USER_POOL.lock().init(split, end);
    log::debug!(
        "frame allocator: {} kernel frames, {} user frames",
        split.0 - start.0,
        end.0 - split.0
    );
}

/// 从 `pool` 分配一个物理帧；池耗尽时返回 None，由调用方决定是否换出。
pub fn alloc_frame(pool: FramePool, flags: AllocFlags) -> Option<FrameTracker> {
    let ppn = pool_of(pool).lock().alloc()?;
    let mut frame = FrameTracker { ppn, pool };
    if flags.contains(AllocFlags::ZERO) {
        frame.zero();
    }
    Some(frame)
}

/// 返回 `pool` 的 (总帧数, 已分配, 空闲)
pub fn frame_stats(pool: FramePool) -> (usize, usize, usize) {
    pool_of(pool).lock().stats()
}
