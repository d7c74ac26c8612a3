//! 页表模块
//!
//! 硬件页表由架构层实现 [`PageTableInner`]；本 crate 只通过该 trait
//! 建立、拆除和查询用户页的映射。

mod table;

pub use table::PageTableInner;

use bitflags::bitflags;

bitflags! {
    /// 与具体架构无关的页表项标志
    ///
    /// 架构层负责与硬件位之间的转换。`ACCESSED`/`DIRTY` 由硬件在访问时置位。
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UniversalPTEFlag: usize {
        /// 有效
        const VALID = 1 << 0;
        /// 可读
        const READABLE = 1 << 1;
        /// 可写
        const WRITEABLE = 1 << 2;
        /// 可执行
        const EXECUTABLE = 1 << 3;
        /// 用户态可访问
        const USER_ACCESSIBLE = 1 << 4;
        /// 最近被访问
        const ACCESSED = 1 << 6;
        /// 被写过
        const DIRTY = 1 << 7;
    }
}

impl UniversalPTEFlag {
    /// 用户页的标志；`writable` 决定是否可写
    pub fn user_page(writable: bool) -> Self {
        let mut flags = Self::VALID | Self::READABLE | Self::EXECUTABLE | Self::USER_ACCESSIBLE;
        if writable {
            flags |= Self::WRITEABLE;
        }
        flags
    }

    /// 去掉硬件维护的状态位，只保留权限
    pub fn permissions(self) -> Self {
        self - (Self::ACCESSED | Self::DIRTY)
    }
}

/// 分页操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
    /// 提供了无效的地址
    InvalidAddress,
    /// 帧（Frame）分配失败
    FrameAllocFailed,
    /// 内存耗尽且无法换出
    OutOfMemory,
    /// 交换区读写失败或已满
    SwapFailed,
    /// 读取后备文件失败或长度不足
    IoError,
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;
