//! 页表接口
//!
//! - 页表的销毁由实现者的 `Drop` 完成：释放页表自身占用的页，
//!   但不释放叶子项指向的用户帧，用户帧归上层的 [`crate::FrameTracker`] 所有。
//! - `activate` / `activate_kernel` 只修改本 CPU 的页表根，调用方负责关中断。

use super::{PagingResult, UniversalPTEFlag};
use crate::address::{Paddr, PageNum, Ppn, UsizeConvert, Vaddr, Vpn};
use alloc::vec::Vec;

/// 页表内部接口
///
/// 此 trait 定义了用户地址空间所需的页表操作，由具体架构实现。
pub trait PageTableInner: Sized + Send + 'static {
    /// 创建新的用户页表（内核部分由实现者自行共享）
    fn new() -> PagingResult<Self>;

    /// 根页表的 PPN
    fn root_ppn(&self) -> Ppn;

    /// 在本 CPU 上激活根为 `ppn` 的页表
    fn activate(ppn: Ppn);

    /// 在本 CPU 上切换到只含内核映射的页表
    fn activate_kernel();

    /// 映射虚拟页到物理页；已映射时返回 [`super::PagingError::AlreadyMapped`]
    fn map(&mut self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()>;

    /// 解除映射，返回原来的物理页
    fn unmap(&mut self, vpn: Vpn) -> PagingResult<Ppn>;

    /// 查询映射
    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)>;

    /// 整体替换映射标志
    fn update_flags(&mut self, vpn: Vpn, flags: UniversalPTEFlag) -> PagingResult<()>;

    /// 所有用户态叶子映射
    fn user_mappings(&self) -> Vec<(Vpn, Ppn, UniversalPTEFlag)>;

    /// 翻译虚拟地址到物理地址
    fn translate(&self, vaddr: Vaddr) -> Option<Paddr> {
        let (ppn, _) = self.walk(Vpn::from_addr_floor(vaddr)).ok()?;
        Some(ppn.start_addr() + vaddr.page_offset())
    }

    /// 页是否被写过
    fn is_dirty(&self, vpn: Vpn) -> bool {
        self.walk(vpn)
            .map(|(_, flags)| flags.contains(UniversalPTEFlag::DIRTY))
            .unwrap_or(false)
    }

    /// 页最近是否被访问过
    fn is_accessed(&self, vpn: Vpn) -> bool {
        self.walk(vpn)
            .map(|(_, flags)| flags.contains(UniversalPTEFlag::ACCESSED))
            .unwrap_or(false)
    }

    /// 清除指定的标志位
    fn clear_flags(&mut self, vpn: Vpn, clear: UniversalPTEFlag) -> PagingResult<()> {
        let (_, flags) = self.walk(vpn)?;
        self.update_flags(vpn, flags - clear)?;
        crate::arch_ops().flush_tlb(vpn.start_addr().as_usize());
        Ok(())
    }
}

