// mm 的单元测试
//
// 协作者来自 `test-support`，trait 在这里实现，`test-support` 因此不依赖 `mm`。
// 物理内存是泄漏出来的页对齐宿主缓冲区，直接映射区为恒等映射。

extern crate std;

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::Once;

use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::fs::MockInode;
use test_support::mock::mm::{MockMmConfig, MockMmOps, PhysArena, MOCK_MM_CONFIG, MOCK_MM_OPS};
use test_support::mock::page_table::MockPageTable;
use test_support::mock::swap::MockSwap;

use crate::{
    AddressSpace, ArchMmOps, FaultError, MmConfig, MmInode, OpenFile, PageNum, PageTableInner,
    PagingError, PagingMode, PagingResult, Ppn, SwapSlot, SwapStore, UniversalPTEFlag,
    UsizeConvert, Vaddr, Vpn,
};


pub const PAGE: usize = 4096;

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn interrupt_enable_bit(&self) -> usize {
        MOCK_ARCH_OPS.interrupt_enable_bit()
    }
}

static TEST_ARCH: TestArch = TestArch;

impl ArchMmOps for MockMmOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MockMmOps::paddr_to_vaddr(self, paddr)
    }

    fn flush_tlb(&self, vaddr: usize) {
        MockMmOps::flush_tlb(self, vaddr)
    }
}

impl MmConfig for MockMmConfig {
    fn page_size(&self) -> usize {
        MockMmConfig::page_size(self)
    }

    fn user_stack_top(&self) -> usize {
        MockMmConfig::user_stack_top(self)
    }

    fn user_space_end(&self) -> usize {
        MockMmConfig::user_space_end(self)
    }
}

impl PageTableInner for MockPageTable {
    fn new() -> PagingResult<Self> {
        MockPageTable::create().ok_or(PagingError::FrameAllocFailed)
    }

    fn root_ppn(&self) -> Ppn {
        Ppn(self.root())
    }

    fn activate(ppn: Ppn) {
        MockPageTable::activate_root(ppn.0);
    }

    fn activate_kernel() {
        MockPageTable::activate_root(0);
    }

    fn map(&mut self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()> {
        if MockPageTable::map(self, vpn.0, ppn.0, flags.bits() as u64) {
            Ok(())
        } else {
            Err(PagingError::AlreadyMapped)
        }
    }

    fn unmap(&mut self, vpn: Vpn) -> PagingResult<Ppn> {
        MockPageTable::unmap(self, vpn.0)
            .map(|pte| Ppn(pte.ppn))
            .ok_or(PagingError::NotMapped)
    }

    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)> {
        self.get(vpn.0)
            .map(|pte| (Ppn(pte.ppn), UniversalPTEFlag::from_bits_truncate(pte.flags as usize)))
            .ok_or(PagingError::NotMapped)
    }

    fn update_flags(&mut self, vpn: Vpn, flags: UniversalPTEFlag) -> PagingResult<()> {
        if self.set_flags(vpn.0, flags.bits() as u64) {
            Ok(())
        } else {
            Err(PagingError::NotMapped)
        }
    }

    fn user_mappings(&self) -> Vec<(Vpn, Ppn, UniversalPTEFlag)> {
        self.entries()
            .into_iter()
            .map(|(vpn, pte)| {
                (
                    Vpn(vpn),
                    Ppn(pte.ppn),
                    UniversalPTEFlag::from_bits_truncate(pte.flags as usize),
                )
            })
            .collect()
    }
}

impl MmInode for MockInode {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        Ok(MockInode::read_at(self, offset, buf))
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        MockInode::write_at(self, offset, buf).ok_or(-1)
    }

    fn size(&self) -> usize {
        MockInode::size(self)
    }

    fn deny_write(&self) {
        MockInode::deny_write(self)
    }

    fn allow_write(&self) {
        MockInode::allow_write(self)
    }
}

impl SwapStore for MockSwap {
    fn write(&self, page: &[u8]) -> Option<SwapSlot> {
        MockSwap::write(self, page).map(SwapSlot)
    }

    fn read(&self, slot: SwapSlot, page: &mut [u8]) -> bool {
        MockSwap::read(self, slot.0, page)
    }

    fn free(&self, slot: SwapSlot) {
        MockSwap::free(self, slot.0)
    }
}

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH);
        crate::register_arch_ops(&MOCK_MM_OPS);
        crate::register_config(&MOCK_MM_CONFIG);
        let (start, end) = PhysArena::leak(4096);
        crate::init_frame_allocator(start, end);
    });
}

pub type Space = AddressSpace<MockPageTable>;

pub fn demand_space() -> Space {
    init();
    Space::new(PagingMode::Demand, None, None).unwrap()
}

pub fn file_with(data: Vec<u8>) -> (Arc<MockInode>, Arc<OpenFile>) {
    let inode = Arc::new(MockInode::new(data));
    let file = OpenFile::new(inode.clone());
    (inode, file)
}

/// 字节 `0, 1, 2, ...`，到 251 回绕，跨页时内容仍可区分
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn mapped_page(space: &mut Space, va: Vaddr, write: bool) -> Result<(Ppn, UniversalPTEFlag), FaultError> {
    let vpn = Vpn::from_addr_floor(va);
    let (ppn, flags) = match space.walk(vpn) {
        Ok(entry) => entry,
        Err(_) => {
            space.handle_fault(va, write)?;
            space.walk(vpn).map_err(|_| FaultError::NoPage)?
        }
    };
    if write && !flags.contains(UniversalPTEFlag::WRITEABLE) {
        return Err(FaultError::Protection);
    }
    let mut set = UniversalPTEFlag::ACCESSED;
    if write {
        set |= UniversalPTEFlag::DIRTY;
    }
    space.table_mut().update_flags(vpn, flags | set).unwrap();
    Ok((ppn, flags))
}

/// 模拟用户态写：必要时触发缺页，并设置硬件访问位与脏位
pub fn user_write(space: &mut Space, va: Vaddr, data: &[u8]) -> Result<(), FaultError> {
    let mut done = 0;
    while done < data.len() {
        let addr = va + done;
        let offset = addr.page_offset();
        let n = (PAGE - offset).min(data.len() - done);
        let (ppn, _) = mapped_page(space, addr, true)?;
        let base = ppn.start_addr().to_vaddr().as_usize() + offset;
        // SAFETY: 帧属于该地址空间，直接映射区为恒等映射
        unsafe { core::ptr::copy_nonoverlapping(data[done..].as_ptr(), base as *mut u8, n) };
        done += n;
    }
    Ok(())
}

/// 模拟用户态读
pub fn user_read(space: &mut Space, va: Vaddr, len: usize) -> Result<Vec<u8>, FaultError> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let addr = va + out.len();
        let offset = addr.page_offset();
        let n = (PAGE - offset).min(len - out.len());
        let (ppn, _) = mapped_page(space, addr, false)?;
        let base = ppn.start_addr().to_vaddr().as_usize() + offset;
        // SAFETY: 同 user_write
        let bytes = unsafe { core::slice::from_raw_parts(base as *const u8, n) };
        out.extend_from_slice(bytes);
    }
    Ok(out)
}
