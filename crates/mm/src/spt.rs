//! 补充页表（SPT）
//!
//! 记录每个用户虚拟页“应当包含什么”，与硬件页表中是否已有映射无关。
//! 缺页时由它决定缺页是否合法、该从哪里取回内容；
//! 进程退出或 exec 时由它负责写回 mmap 脏页并释放全部帧与交换槽位。
//!
//! 硬件页表不归 SPT 所有，需要修改映射的操作都显式接收 `&mut PT`。

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn};
use crate::file::OpenFile;
use crate::frame_allocator::{alloc_frame, AllocFlags, FramePool, FrameTracker};
use crate::mmap::MappingRecord;
use crate::page::{Frame, LazyLoad, Page, PageKind, UninitPage};
use crate::page_table::{PageTableInner, PagingError, PagingResult, UniversalPTEFlag};
use crate::swap::SwapStore;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 缺页无法被解决的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 地址没有登记任何页（段错误）
    NoPage,
    /// 页已驻留，或对只读页写入
    Protection,
    /// 没有可用的帧，也无法换出
    OutOfMemory,
    /// 从文件或交换区取回内容失败
    LoadFailed,
}

impl From<PagingError> for FaultError {
    fn from(err: PagingError) -> Self {
        match err {
            PagingError::IoError | PagingError::SwapFailed => FaultError::LoadFailed,
            PagingError::NotMapped | PagingError::InvalidAddress => FaultError::NoPage,
            _ => FaultError::OutOfMemory,
        }
    }
}

/// 补充页表
pub struct SupplementalPageTable {
    pages: BTreeMap<Vpn, Page>,
    pub(crate) mappings: BTreeMap<Vpn, MappingRecord>,
    swap: Option<Arc<dyn SwapStore>>,
    resident_limit: Option<usize>,
    resident: usize,
    clock_hand: Vpn,
}

impl SupplementalPageTable {
    /// 创建空表
    ///
    /// `resident_limit` 限制同时驻留的页数，达到上限后先换出再分配。
    pub fn new(swap: Option<Arc<dyn SwapStore>>, resident_limit: Option<usize>) -> Self {
        Self {
            pages: BTreeMap::new(),
            mappings: BTreeMap::new(),
            swap,
            resident_limit,
            resident: 0,
            clock_hand: Vpn(0),
        }
    }

    /// 包含 `va` 的页
    pub fn find_page(&self, va: Vaddr) -> Option<&Page> {
        self.pages.get(&Vpn::from_addr_floor(va))
    }

    /// 是否已有 `vpn` 的页
    pub fn contains(&self, vpn: Vpn) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 登记的页数
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// 是否没有任何页
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 驻留的页数
    pub fn resident_count(&self) -> usize {
        self.resident
    }

    pub(crate) fn swap(&self) -> Option<Arc<dyn SwapStore>> {
        self.swap.clone()
    }

    pub(crate) fn resident_limit(&self) -> Option<usize> {
        self.resident_limit
    }

    /// 按地址顺序遍历所有页
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// 登记一个延迟加载的页；`vpn` 已有页时失败
    pub fn alloc_page_with_initializer(&mut self, vpn: Vpn, writable: bool, load: LazyLoad) -> PagingResult<()> {
        if self.pages.contains_key(&vpn) {
            return Err(PagingError::AlreadyMapped);
        }
        let page = Page::new(vpn, writable, PageKind::Uninit(UninitPage::new(load)));
        self.pages.insert(vpn, page);
        Ok(())
    }

    /// 登记一个全零的匿名页
    pub fn alloc_page(&mut self, vpn: Vpn, writable: bool) -> PagingResult<()> {
        self.alloc_page_with_initializer(vpn, writable, LazyLoad::Zero)
    }

    /// 页是否脏：硬件页表项或帧自身的内核写标志任一置位即可
    pub fn is_dirty<PT: PageTableInner>(&self, table: &PT, vpn: Vpn) -> bool {
        let kernel_dirty = self
            .pages
            .get(&vpn)
            .and_then(Page::frame)
            .is_some_and(Frame::is_kernel_dirty);
        kernel_dirty || table.is_dirty(vpn)
    }

    /// 为 `vpn` 取得帧、装入内容并建立映射
    pub fn claim_page<PT: PageTableInner>(&mut self, table: &mut PT, vpn: Vpn) -> PagingResult<()> {
        match self.pages.get(&vpn) {
            None => return Err(PagingError::NotMapped),
            Some(page) if page.is_resident() => return Ok(()),
            Some(_) => {}
        }
        let tracker = self.obtain_frame(table)?;
        let swap = self.swap.clone();
        let page = self.pages.get_mut(&vpn).ok_or(PagingError::NotMapped)?;
        let mut frame = Frame::new(tracker, vpn);
        page.swap_in(&mut frame, swap.as_deref())?;
        table.map(vpn, frame.ppn(), UniversalPTEFlag::user_page(page.writable()))?;
        page.commit_swap_in(swap.as_deref());
        page.attach(frame);
        self.resident += 1;
        Ok(())
    }

    /// 处理用户地址 `addr` 上的缺页
    ///
    /// 只有登记过且尚未驻留的页可以被解决；其余情况交给调用方按策略处理。
    pub fn try_handle_fault<PT: PageTableInner>(
        &mut self,
        table: &mut PT,
        addr: Vaddr,
        write: bool,
    ) -> Result<(), FaultError> {
        if !crate::mm_config().is_user_vaddr(addr.as_usize()) {
            return Err(FaultError::NoPage);
        }
        let vpn = Vpn::from_addr_floor(addr);
        let page = self.pages.get(&vpn).ok_or(FaultError::NoPage)?;
        if page.is_resident() || (write && !page.writable()) {
            return Err(FaultError::Protection);
        }
        self.claim_page(table, vpn)?;
        Ok(())
    }

    /// 内核访问 `vpn`：必要时先装入，返回其帧
    pub fn frame_for_access<PT: PageTableInner>(
        &mut self,
        table: &mut PT,
        vpn: Vpn,
        write: bool,
    ) -> PagingResult<&mut Frame> {
        let page = self.pages.get(&vpn).ok_or(PagingError::NotMapped)?;
        if write && !page.writable() {
            return Err(PagingError::InvalidAddress);
        }
        self.claim_page(table, vpn)?;
        self.pages
            .get_mut(&vpn)
            .and_then(Page::frame_mut)
            .ok_or(PagingError::NotMapped)
    }

    /// 从 SPT 中删除一页：解除映射、释放类型私有资源和帧
    ///
    /// 不做写回；mmap 页的写回由 [`SupplementalPageTable::do_munmap`] 负责。
    pub fn remove_page<PT: PageTableInner>(&mut self, table: &mut PT, vpn: Vpn) -> PagingResult<()> {
        let mut page = self.pages.remove(&vpn).ok_or(PagingError::NotMapped)?;
        if page.is_resident() {
            if let Err(err) = table.unmap(vpn) {
                log::warn!("remove page {:#x}: unmap failed: {:?}", vpn.start_addr().as_usize(), err);
            }
            crate::arch_ops().flush_tlb(vpn.start_addr().as_usize());
            self.resident -= 1;
        }
        page.destroy(self.swap.as_deref());
        Ok(())
    }

    /// 取得一个用户帧，必要时换出本进程的一页
    fn obtain_frame<PT: PageTableInner>(&mut self, table: &mut PT) -> PagingResult<FrameTracker> {
        let at_limit = self.resident_limit.is_some_and(|limit| self.resident >= limit);
        if !at_limit {
            if let Some(tracker) = alloc_frame(FramePool::User, AllocFlags::empty()) {
                return Ok(tracker);
            }
        }
        self.evict_one(table)
    }

    /// 用二次机会时钟算法选出一个驻留页并换出，返回腾出的帧
    fn evict_one<PT: PageTableInner>(&mut self, table: &mut PT) -> PagingResult<FrameTracker> {
        let resident: Vec<Vpn> = self
            .pages
            .values()
            .filter(|page| page.is_resident())
            .map(Page::vpn)
            .collect();
        if resident.is_empty() {
            return Err(PagingError::OutOfMemory);
        }
        let start = resident
            .iter()
            .position(|vpn| *vpn > self.clock_hand)
            .unwrap_or(0);
        let mut victim = resident[start];
        for step in 0..resident.len() * 2 {
            let vpn = resident[(start + step) % resident.len()];
            if table.is_accessed(vpn) {
                table.clear_flags(vpn, UniversalPTEFlag::ACCESSED)?;
                continue;
            }
            victim = vpn;
            break;
        }
        self.clock_hand = victim;

        let dirty = self.is_dirty(table, victim);
        let swap = self.swap.clone();
        let page = self.pages.get_mut(&victim).ok_or(PagingError::NotMapped)?;
        let frame = page.detach().ok_or(PagingError::NotMapped)?;
        if let Err(err) = page.swap_out(&frame, dirty, swap.as_deref()) {
            log::warn!("cannot evict page {:#x}: {:?}", victim.start_addr().as_usize(), err);
            page.attach(frame);
            return Err(PagingError::OutOfMemory);
        }
        table.unmap(victim)?;
        crate::arch_ops().flush_tlb(victim.start_addr().as_usize());
        self.resident -= 1;
        log::debug!("evicted page {:#x}", victim.start_addr().as_usize());
        Ok(frame.into_tracker())
    }

    /// fork：把父进程的 SPT 深拷贝到本表（子进程，应为空表）
    ///
    /// 驻留页分配新帧并复制内容；换出的匿名页从交换区读出副本；
    /// 未初始化页只复制延迟加载描述，由子进程自行加载。
    /// mmap 记录连同重新打开的文件句柄一起复制。
    pub fn copy_from<PT: PageTableInner>(
        &mut self,
        table: &mut PT,
        parent: &SupplementalPageTable,
        parent_table: &PT,
    ) -> PagingResult<()> {
        let mut files: BTreeMap<Vpn, Arc<OpenFile>> = BTreeMap::new();
        for (start, record) in &parent.mappings {
            let file = record.file().reopen();
            files.insert(*start, file.clone());
            self.mappings
                .insert(*start, MappingRecord::new(*start, record.page_count(), file));
        }

        for (vpn, parent_page) in &parent.pages {
            let vpn = *vpn;
            let mut page = Page::new(vpn, parent_page.writable(), parent_page.fork_kind(&files));
            let source = match (parent_page.frame(), parent_page.kind()) {
                (Some(parent_frame), _) => Some(parent_frame.as_bytes()),
                (None, PageKind::Anon(anon)) if anon.slot().is_some() => None,
                _ => {
                    self.pages.insert(vpn, page);
                    continue;
                }
            };
            let tracker = self.obtain_frame(table)?;
            let mut frame = Frame::new(tracker, vpn);
            match (source, parent_page.kind()) {
                (Some(bytes), _) => frame.as_bytes_mut().copy_from_slice(bytes),
                (None, PageKind::Anon(anon)) => anon.swap_in(frame.as_bytes_mut(), self.swap.as_deref())?,
                (None, _) => frame.as_bytes_mut().fill(0),
            }
            if matches!(page.kind(), PageKind::File(_)) {
                frame.set_kernel_dirty(parent.is_dirty(parent_table, vpn));
            }
            table.map(vpn, frame.ppn(), UniversalPTEFlag::user_page(page.writable()))?;
            page.attach(frame);
            self.pages.insert(vpn, page);
            self.resident += 1;
        }
        Ok(())
    }

    /// 拆除整张表：先解除全部 mmap（写回脏页），再删除其余页
    pub fn kill<PT: PageTableInner>(&mut self, table: &mut PT) {
        let starts: Vec<Vpn> = self.mappings.keys().copied().collect();
        for start in starts {
            self.do_munmap(table, start.start_addr());
        }
        let vpns: Vec<Vpn> = self.pages.keys().copied().collect();
        for vpn in vpns {
            let removed = self.remove_page(table, vpn);
            debug_assert!(removed.is_ok(), "kill: page {:?} vanished", vpn);
        }
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new(None, None)
    }
}

