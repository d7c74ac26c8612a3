//! 可执行文件装载
//!
//! [`load_image`] 为命令行中的程序建立一个全新的地址空间：
//!
//! 1. 解析并校验 ELF 头与程序头（见 [`elf`]）
//! 2. 逐个校验 LOAD 段，按页切分为“从文件读 `read_bytes`、补零 `zero_bytes`”
//! 3. 立即装载模式下分配帧并填充；按需装载模式下只登记延迟加载的页
//! 4. 在 `USER_STACK` 之下建立一页栈，并按 System V 约定放置参数（见 [`stack`]）
//!
//! 任何一步失败时，已经建立的部分随地址空间一起释放。

pub mod elf;
pub mod stack;

use alloc::sync::Arc;
use alloc::vec::Vec;
use mm::{
    alloc_frame, mm_config, AddressSpace, AllocFlags, FileRange, FramePool, LazyLoad, OpenFile,
    PageNum, PageTableInner, PagingError, PagingMode, SwapStore, Vaddr, Vpn,
};

use crate::config::ProcessConfig;
use crate::error::LoadError;
use crate::ops::FileSystem;
use crate::trap_frame::TrapFrame;

pub use elf::{ElfImage, Segment};
pub use stack::ArgumentStack;

/// 一个段页的装载计划
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagePlan {
    /// 页的起始虚拟地址
    pub vaddr: usize,
    /// 页内容在文件中的起始偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 补零的字节数
    pub zero_bytes: usize,
}

/// 命令行中的程序名（第一个词）
pub fn program_name(cmd_line: &str) -> &str {
    cmd_line.split(' ').find(|t| !t.is_empty()).unwrap_or("")
}

/// 打开可执行文件
pub fn open_executable(fs: &dyn FileSystem, name: &str) -> Result<Arc<OpenFile>, LoadError> {
    match fs.open(name) {
        Some(inode) => Ok(OpenFile::new(inode)),
        None => {
            log::warn!("load: {}: open failed", name);
            Err(LoadError::OpenFailed)
        }
    }
}

/// 校验一个 LOAD 段
///
/// 段的文件偏移与虚拟地址页内偏移必须一致，内存大小非零且不小于文件大小，
/// 整个段落在用户空间内且不触及第 0 页。
pub fn validate_segment(seg: &Segment, file_len: usize) -> Result<(), LoadError> {
    let config = mm_config();
    let mask = config.page_size() as u64 - 1;
    let end = seg.vaddr.checked_add(seg.mem_size);
    let valid = seg.offset & mask == seg.vaddr & mask
        && seg.offset <= file_len as u64
        && seg.mem_size >= seg.file_size
        && seg.mem_size != 0
        && config.is_user_vaddr(seg.vaddr as usize)
        && end.is_some_and(|end| config.is_user_vaddr(end as usize))
        && seg.vaddr >= config.page_size() as u64;
    if valid { Ok(()) } else { Err(LoadError::BadSegment) }
}

/// 把已校验的段切分为逐页的装载计划
///
/// 文件部分之后直到页边界全部补零；`file_size == 0` 的段整段补零。
pub fn segment_pages(seg: &Segment) -> Vec<PagePlan> {
    let page_size = mm_config().page_size();
    let mask = page_size - 1;
    let page_offset = seg.vaddr as usize & mask;
    let mut offset = seg.offset as usize & !mask;
    let mut vaddr = seg.vaddr as usize & !mask;
    let span = (page_offset + seg.mem_size as usize).div_ceil(page_size) * page_size;
    let mut read_left = if seg.file_size > 0 {
        page_offset + seg.file_size as usize
    } else {
        0
    };
    let mut zero_left = span - read_left;

    let mut plans = Vec::with_capacity(span / page_size);
    while read_left > 0 || zero_left > 0 {
        let read_bytes = read_left.min(page_size);
        let zero_bytes = page_size - read_bytes;
        plans.push(PagePlan {
            vaddr,
            offset,
            read_bytes,
            zero_bytes,
        });
        read_left -= read_bytes;
        zero_left -= zero_bytes;
        offset += page_size;
        vaddr += page_size;
    }
    plans
}

fn paging_error(err: PagingError) -> LoadError {
    match err {
        PagingError::AlreadyMapped | PagingError::IoError => LoadError::BadSegment,
        _ => LoadError::OutOfMemory,
    }
}

fn load_page<PT: PageTableInner>(
    space: &mut AddressSpace<PT>,
    exe: &Arc<OpenFile>,
    plan: &PagePlan,
    writable: bool,
) -> Result<(), PagingError> {
    let vpn = Vpn::from_addr_floor(Vaddr(plan.vaddr));
    let range = FileRange {
        file: exe.clone(),
        offset: plan.offset,
        read_bytes: plan.read_bytes,
        zero_bytes: plan.zero_bytes,
    };
    match space.mode() {
        PagingMode::Eager => {
            let mut frame = alloc_frame(FramePool::User, AllocFlags::empty())
                .ok_or(PagingError::FrameAllocFailed)?;
            range.fill(frame.as_bytes_mut())?;
            space.install_page(vpn, frame, writable)
        }
        PagingMode::Demand => space.register_lazy(vpn, writable, LazyLoad::Segment(range)),
    }
}

/// 为 `cmd_line` 建立地址空间，并返回进入用户态所用的上下文
///
/// `exe` 是已经打开的可执行文件；地址空间尚未被激活。
pub fn load_image<PT: PageTableInner>(
    config: &ProcessConfig,
    swap: Option<Arc<dyn SwapStore>>,
    exe: &Arc<OpenFile>,
    cmd_line: &str,
) -> Result<(AddressSpace<PT>, TrapFrame), LoadError> {
    let name = program_name(cmd_line);
    let result = build_image(config, swap, exe, cmd_line);
    match &result {
        Ok((_, frame)) => log::debug!(
            "load: {}: entry {:#x}, rsp {:#x}, argc {}",
            name,
            frame.rip,
            frame.rsp,
            frame.rdi
        ),
        Err(err) => log::warn!("load: {}: error loading executable ({:?})", name, err),
    }
    result
}

fn build_image<PT: PageTableInner>(
    config: &ProcessConfig,
    swap: Option<Arc<dyn SwapStore>>,
    exe: &Arc<OpenFile>,
    cmd_line: &str,
) -> Result<(AddressSpace<PT>, TrapFrame), LoadError> {
    let mut space = AddressSpace::<PT>::new(config.paging, swap, config.max_resident_pages)
        .map_err(|_| LoadError::OutOfMemory)?;

    let image = elf::parse(exe, config.max_program_headers)?;
    for seg in &image.segments {
        validate_segment(seg, exe.len())?;
        for plan in segment_pages(seg) {
            load_page(&mut space, exe, &plan, seg.writable).map_err(paging_error)?;
        }
    }

    let mm = mm_config();
    let top = mm.user_stack_top();
    space
        .setup_stack(Vaddr(top))
        .map_err(|_| LoadError::OutOfMemory)?;
    let args = ArgumentStack::build(cmd_line, top, mm.page_size())?;
    space
        .write_bytes(Vaddr(args.rsp), &args.bytes)
        .map_err(|_| LoadError::OutOfMemory)?;

    let mut frame = TrapFrame::new_user();
    frame.rip = image.entry;
    frame.rsp = args.rsp as u64;
    frame.rdi = args.argc as u64;
    frame.rsi = args.argv as u64;
    Ok((space, frame))
}
