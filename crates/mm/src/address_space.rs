//! 进程地址空间
//!
//! 一张硬件页表加上它的后备存储：
//!
//! - [`PagingMode::Eager`]：不启用虚拟内存，页在装载时即分配帧并拷贝内容，
//!   帧由地址空间直接持有；fork 时遍历页表逐页复制。
//! - [`PagingMode::Demand`]：启用虚拟内存，页登记在 [`SupplementalPageTable`]
//!   中按需装入；fork 时深拷贝 SPT；支持 mmap。
//!
//! 地址空间被 drop 时先拆除 SPT（写回 mmap 脏页），再销毁页表。
//! 调用方必须先让本 CPU 离开这张页表（见 [`AddressSpace::deactivate`]）。

use crate::address::{PageNum, Ppn, UsizeConvert, Vaddr, Vpn};
use crate::file::OpenFile;
use crate::frame_allocator::{alloc_frame, AllocFlags, FramePool, FrameTracker};
use crate::mmap::MmapError;
use crate::page::LazyLoad;
use crate::page_table::{PageTableInner, PagingError, PagingResult, UniversalPTEFlag};
use crate::spt::{FaultError, SupplementalPageTable};
use crate::swap::SwapStore;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use sync::IntrGuard;

/// 用户页的装载方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PagingMode {
    /// 装载时立即分配并填充
    Eager,
    /// 第一次访问时装入
    #[default]
    Demand,
}

enum Backing {
    Eager(BTreeMap<Vpn, FrameTracker>),
    Demand(SupplementalPageTable),
}

/// 进程地址空间
pub struct AddressSpace<PT: PageTableInner> {
    table: PT,
    backing: Backing,
}

impl<PT: PageTableInner> AddressSpace<PT> {
    /// 创建空的地址空间；页表创建失败时返回错误
    pub fn new(
        mode: PagingMode,
        swap: Option<Arc<dyn SwapStore>>,
        resident_limit: Option<usize>,
    ) -> PagingResult<Self> {
        let table = PT::new()?;
        let backing = match mode {
            PagingMode::Eager => Backing::Eager(BTreeMap::new()),
            PagingMode::Demand => Backing::Demand(SupplementalPageTable::new(swap, resident_limit)),
        };
        Ok(Self { table, backing })
    }

    /// 装载方式
    pub fn mode(&self) -> PagingMode {
        match self.backing {
            Backing::Eager(_) => PagingMode::Eager,
            Backing::Demand(_) => PagingMode::Demand,
        }
    }

    /// 硬件页表
    pub fn table(&self) -> &PT {
        &self.table
    }

    /// 硬件页表（可变）
    pub fn table_mut(&mut self) -> &mut PT {
        &mut self.table
    }

    /// 补充页表（仅按需装载时存在）
    pub fn spt(&self) -> Option<&SupplementalPageTable> {
        match &self.backing {
            Backing::Demand(spt) => Some(spt),
            Backing::Eager(_) => None,
        }
    }

    /// 在本 CPU 上激活此地址空间
    pub fn activate(&self) {
        let _guard = IntrGuard::new();
        PT::activate(self.table.root_ppn());
    }

    /// 让本 CPU 回到只含内核映射的页表
    pub fn deactivate() {
        let _guard = IntrGuard::new();
        PT::activate_kernel();
    }

    /// 立即装入一页：把已填充好的帧映射到 `vpn`
    ///
    /// 仅用于 [`PagingMode::Eager`]；`vpn` 已映射时失败，帧随之释放。
    pub fn install_page(&mut self, vpn: Vpn, frame: FrameTracker, writable: bool) -> PagingResult<()> {
        let Backing::Eager(frames) = &mut self.backing else {
            return Err(PagingError::InvalidAddress);
        };
        if frames.contains_key(&vpn) {
            return Err(PagingError::AlreadyMapped);
        }
        self.table
            .map(vpn, frame.ppn(), UniversalPTEFlag::user_page(writable))?;
        frames.insert(vpn, frame);
        Ok(())
    }

    /// 登记一个延迟加载的页
    ///
    /// 仅用于 [`PagingMode::Demand`]；`vpn` 已有页时失败。
    pub fn register_lazy(&mut self, vpn: Vpn, writable: bool, load: LazyLoad) -> PagingResult<()> {
        match &mut self.backing {
            Backing::Demand(spt) => spt.alloc_page_with_initializer(vpn, writable, load),
            Backing::Eager(_) => Err(PagingError::InvalidAddress),
        }
    }

    /// 在 `top` 之下建立一页可写的全零用户栈
    ///
    /// 按需装载时栈页以匿名页登记后立即装入。
    pub fn setup_stack(&mut self, top: Vaddr) -> PagingResult<()> {
        let vpn = Vpn::from_addr_floor(top - crate::mm_config().page_size());
        if let Backing::Demand(spt) = &mut self.backing {
            spt.alloc_page(vpn, true)?;
            return spt.claim_page(&mut self.table, vpn);
        }
        let frame =
            alloc_frame(FramePool::User, AllocFlags::ZERO).ok_or(PagingError::FrameAllocFailed)?;
        self.install_page(vpn, frame, true)
    }

    /// 为 fork 复制整个地址空间
    ///
    /// 任何一步失败时，已分配的页表与帧随返回的错误一起释放。
    pub fn duplicate(&self) -> PagingResult<Self> {
        let mut table = PT::new()?;
        let backing = match &self.backing {
            Backing::Eager(frames) => {
                let mut copies = BTreeMap::new();
                for (vpn, _, flags) in self.table.user_mappings() {
                    let source = frames.get(&vpn).ok_or(PagingError::NotMapped)?;
                    let mut frame = alloc_frame(FramePool::User, AllocFlags::empty())
                        .ok_or(PagingError::FrameAllocFailed)?;
                    frame.as_bytes_mut().copy_from_slice(source.as_bytes());
                    table.map(vpn, frame.ppn(), flags.permissions())?;
                    copies.insert(vpn, frame);
                }
                Backing::Eager(copies)
            }
            Backing::Demand(spt) => {
                let mut child = SupplementalPageTable::new(spt.swap(), spt.resident_limit());
                if let Err(err) = child.copy_from(&mut table, spt, &self.table) {
                    child.kill(&mut table);
                    return Err(err);
                }
                Backing::Demand(child)
            }
        };
        Ok(Self { table, backing })
    }

    /// 处理用户缺页
    pub fn handle_fault(&mut self, addr: Vaddr, write: bool) -> Result<(), FaultError> {
        match &mut self.backing {
            Backing::Demand(spt) => spt.try_handle_fault(&mut self.table, addr, write),
            Backing::Eager(frames) => {
                if frames.contains_key(&Vpn::from_addr_floor(addr)) {
                    Err(FaultError::Protection)
                } else {
                    Err(FaultError::NoPage)
                }
            }
        }
    }

    /// 建立文件映射
    pub fn mmap(
        &mut self,
        addr: Vaddr,
        length: usize,
        writable: bool,
        file: &OpenFile,
        offset: usize,
    ) -> Result<Vaddr, MmapError> {
        match &mut self.backing {
            Backing::Demand(spt) => spt.do_mmap(addr, length, writable, file, offset),
            Backing::Eager(_) => Err(MmapError::Unsupported),
        }
    }

    /// 解除文件映射
    ///
    /// # Panics
    /// `addr` 不是一条现存映射的起始地址
    pub fn munmap(&mut self, addr: Vaddr) {
        match &mut self.backing {
            Backing::Demand(spt) => spt.do_munmap(&mut self.table, addr),
            Backing::Eager(_) => panic!("munmap: no mapping starts at {:#x}", addr.as_usize()),
        }
    }

    /// 从用户地址 `va` 读取 `buf.len()` 字节
    pub fn read_bytes(&mut self, va: Vaddr, buf: &mut [u8]) -> PagingResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va + done;
            let offset = addr.page_offset();
            let n = (crate::mm_config().page_size() - offset).min(buf.len() - done);
            let bytes = self.user_frame(Vpn::from_addr_floor(addr), false)?;
            buf[done..done + n].copy_from_slice(&bytes[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// 向用户地址 `va` 写入 `data`
    ///
    /// 写入经由直接映射区完成，会设置帧自身的脏标志。
    pub fn write_bytes(&mut self, va: Vaddr, data: &[u8]) -> PagingResult<()> {
        let mut done = 0;
        while done < data.len() {
            let addr = va + done;
            let offset = addr.page_offset();
            let n = (crate::mm_config().page_size() - offset).min(data.len() - done);
            let bytes = self.user_frame(Vpn::from_addr_floor(addr), true)?;
            bytes[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    fn user_frame(&mut self, vpn: Vpn, write: bool) -> PagingResult<&mut [u8]> {
        match &mut self.backing {
            Backing::Eager(frames) => {
                let (_, flags) = self.table.walk(vpn)?;
                if write && !flags.contains(UniversalPTEFlag::WRITEABLE) {
                    return Err(PagingError::InvalidAddress);
                }
                let frame = frames.get_mut(&vpn).ok_or(PagingError::NotMapped)?;
                Ok(frame.as_bytes_mut())
            }
            Backing::Demand(spt) => {
                let frame = spt.frame_for_access(&mut self.table, vpn, write)?;
                if write {
                    frame.mark_kernel_dirty();
                }
                Ok(frame.as_bytes_mut())
            }
        }
    }

    /// 用户地址 `va` 对应的物理地址
    pub fn translate(&self, va: Vaddr) -> Option<usize> {
        self.table.translate(va).map(|pa| pa.as_usize())
    }

    /// `vpn` 对应的页表项
    pub fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)> {
        self.table.walk(vpn)
    }
}

impl<PT: PageTableInner> Drop for AddressSpace<PT> {
    fn drop(&mut self) {
        if let Backing::Demand(spt) = &mut self.backing {
            spt.kill(&mut self.table);
        }
    }
}
