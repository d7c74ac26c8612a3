//! 文件映射（mmap / munmap）
//!
//! 每次成功的 mmap 都会重新打开文件，映射持有自己的句柄，
//! 调用者之后关闭原来的 fd 不影响映射。映射内的页以
//! [`LazyLoad::Mapped`] 登记，第一次访问时才从文件读入。

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn, VpnRange};
use crate::file::OpenFile;
use crate::page::{FileRange, LazyLoad, PageKind};
use crate::page_table::PageTableInner;
use crate::spt::SupplementalPageTable;
use alloc::sync::Arc;

/// mmap 被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// 地址为空
    NullAddress,
    /// 地址未按页对齐
    UnalignedAddress,
    /// 文件偏移未按页对齐
    UnalignedOffset,
    /// 长度为 0
    ZeroLength,
    /// 偏移超出文件末尾
    OffsetBeyondEof,
    /// 范围超出用户地址空间或发生回绕
    OutsideUserSpace,
    /// 范围与已有页重叠
    Overlap,
    /// 文件无效
    BadFile,
    /// 当前地址空间不支持文件映射
    Unsupported,
}

/// 一条映射记录
#[derive(Debug)]
pub struct MappingRecord {
    start: Vpn,
    page_count: usize,
    file: Arc<OpenFile>,
}

impl MappingRecord {
    pub(crate) fn new(start: Vpn, page_count: usize, file: Arc<OpenFile>) -> Self {
        Self {
            start,
            page_count,
            file,
        }
    }

    /// 起始页
    pub fn start(&self) -> Vpn {
        self.start
    }

    /// 页数
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// 映射私有的文件句柄
    pub fn file(&self) -> &Arc<OpenFile> {
        &self.file
    }

    /// 覆盖的页范围
    pub fn range(&self) -> VpnRange {
        VpnRange::from_start_len(self.start, self.page_count)
    }
}

impl SupplementalPageTable {
    /// 将 `file` 从 `offset` 开始的 `length` 字节映射到 `addr`
    ///
    /// 成功时返回 `addr`。任何拒绝都不会留下副作用。
    pub fn do_mmap(
        &mut self,
        addr: Vaddr,
        length: usize,
        writable: bool,
        file: &OpenFile,
        offset: usize,
    ) -> Result<Vaddr, MmapError> {
        let page_size = crate::mm_config().page_size();
        if addr.as_usize() == 0 {
            return Err(MmapError::NullAddress);
        }
        if !addr.is_page_aligned() {
            return Err(MmapError::UnalignedAddress);
        }
        if offset % page_size != 0 {
            return Err(MmapError::UnalignedOffset);
        }
        if length == 0 {
            return Err(MmapError::ZeroLength);
        }
        let file_len = file.len();
        if offset > file_len {
            return Err(MmapError::OffsetBeyondEof);
        }
        let in_user_space = addr
            .as_usize()
            .checked_add(length)
            .is_some_and(|end| end <= crate::mm_config().user_space_end());
        if !in_user_space {
            return Err(MmapError::OutsideUserSpace);
        }

        let start = Vpn::from_addr_floor(addr);
        let page_count = (length - 1) / page_size + 1;
        let range = VpnRange::from_start_len(start, page_count);
        if range.into_iter().any(|vpn| self.contains(vpn)) {
            return Err(MmapError::Overlap);
        }

        let mapped = file.reopen();
        let mut read_left = length.min(file_len - offset);
        let mut file_offset = offset;
        for vpn in range {
            let read_bytes = read_left.min(page_size);
            let load = LazyLoad::Mapped {
                mapping: start,
                range: FileRange {
                    file: mapped.clone(),
                    offset: file_offset,
                    read_bytes,
                    zero_bytes: page_size - read_bytes,
                },
            };
            // 上面已检查过重叠
            let registered = self.alloc_page_with_initializer(vpn, writable, load);
            debug_assert!(registered.is_ok(), "mmap: page {:?} already registered", vpn);
            read_left -= read_bytes;
            file_offset += page_size;
        }
        self.mappings
            .insert(start, MappingRecord::new(start, page_count, mapped));
        Ok(addr)
    }

    /// 解除以 `addr` 为起点的映射
    ///
    /// 驻留且脏的页先写回文件，再从 SPT 中删除。
    ///
    /// # Panics
    /// `addr` 不是一条现存映射的起始地址。调用方（系统调用层）应当已经验证过。
    pub fn do_munmap<PT: PageTableInner>(&mut self, table: &mut PT, addr: Vaddr) {
        let record = addr
            .is_page_aligned()
            .then(|| self.mappings.remove(&Vpn::from_addr_floor(addr)))
            .flatten()
            .unwrap_or_else(|| panic!("munmap: no mapping starts at {:#x}", addr.as_usize()));

        for vpn in record.range() {
            let dirty = self.is_dirty(table, vpn);
            if let Some(page) = self.find_page(vpn.start_addr()) {
                if let (Some(frame), PageKind::File(file_page), true) = (page.frame(), page.kind(), dirty) {
                    file_page.range().write_back(frame.as_bytes());
                }
            }
            if let Err(err) = self.remove_page(table, vpn) {
                log::warn!("munmap: page {:#x} missing: {:?}", vpn.start_addr().as_usize(), err);
            }
        }
    }

    /// 以 `start` 开头的映射记录
    pub fn mapping(&self, start: Vpn) -> Option<&MappingRecord> {
        self.mappings.get(&start)
    }

    /// 映射记录数量
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }
}
