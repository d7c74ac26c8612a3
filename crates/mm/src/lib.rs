//! 内存管理子系统
//!
//! 为用户进程提供物理帧、页表抽象和按需分页的地址空间：
//!
//! - [`frame_allocator`]：内核池 / 用户池的物理帧分配
//! - [`PageTableInner`]：硬件页表接口，由架构层实现
//! - [`page`] 与 [`SupplementalPageTable`]：页的三种类型与缺页处理
//! - [`SupplementalPageTable::do_mmap`] / [`SupplementalPageTable::do_munmap`]：文件映射
//! - [`AddressSpace`]：一张页表加上它的后备存储
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchMmOps`]: 直接映射区地址转换、TLB 操作
//! - [`MmConfig`]: 内存布局常量
//! - [`MmInode`] / [`SwapStore`]: 文件与交换区
//!
//! 使用前必须调用 [`register_arch_ops`] 和 [`register_config`] 注册实现，
//! 并用 [`init_frame_allocator`] 交出可用的物理内存。

#![no_std]

extern crate alloc;

mod arch_ops;
mod config;
mod file;
mod mmap;
mod spt;
mod swap;

pub mod address;
pub mod address_space;
pub mod frame_allocator;
pub mod page;
pub mod page_table;

pub use arch_ops::{arch_ops, register_arch_ops, ArchMmOps};
pub use config::{mm_config, register_config, MmConfig};
pub use file::{MmInode, OpenFile};
pub use mmap::{MappingRecord, MmapError};
pub use spt::{FaultError, SupplementalPageTable};
pub use swap::{SwapSlot, SwapStore};

pub use address::{PageNum, Paddr, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange};
pub use address_space::{AddressSpace, PagingMode};
pub use frame_allocator::{
    alloc_frame, frame_stats, init_frame_allocator, AllocFlags, FramePool, FrameTracker,
};
pub use page::{FileRange, Frame, LazyLoad, Page, PageKind, VmType};
pub use page_table::{PageTableInner, PagingError, PagingResult, UniversalPTEFlag};

#[cfg(test)]
mod tests;
