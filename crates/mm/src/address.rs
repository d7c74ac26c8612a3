//! 地址与页号
//!
//! - [`Vaddr`] / [`Paddr`]：虚拟地址与物理地址
//! - [`Vpn`] / [`Ppn`]：虚拟页号与物理页号，通过 [`PageNum`] 与地址互转
//! - [`VpnRange`]：半开区间 `[start, end)` 的虚拟页号范围
//!
//! 页大小来自注册的 [`crate::MmConfig`]。

use core::ops::{Add, Sub};

#[inline]
fn page_size() -> usize {
    crate::mm_config().page_size()
}

/// 在类型与 usize 之间转换
pub trait UsizeConvert: Copy {
    /// 取出原始数值
    fn as_usize(&self) -> usize;
    /// 由原始数值构造
    fn from_usize(value: usize) -> Self;
}

macro_rules! impl_address {
    ($type:ident) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl $type {
            /// 页内偏移
            pub fn page_offset(self) -> usize {
                self.0 & (page_size() - 1)
            }

            /// 是否按页对齐
            pub fn is_page_aligned(self) -> bool {
                self.page_offset() == 0
            }

            /// 向下对齐到页边界
            pub fn align_down(self) -> Self {
                Self(self.0 & !(page_size() - 1))
            }

            /// 向上对齐到页边界；溢出时返回 None
            pub fn align_up(self) -> Option<Self> {
                self.0
                    .checked_add(page_size() - 1)
                    .map(|v| Self(v & !(page_size() - 1)))
            }
        }

        impl Add<usize> for $type {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $type {
            type Output = Self;

            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }
    };
}

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr);

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Paddr(pub usize);
impl_address!(Paddr);

impl Paddr {
    /// 经直接映射区得到内核可访问的虚拟地址
    pub fn to_vaddr(self) -> Vaddr {
        Vaddr(crate::arch_ops().paddr_to_vaddr(self.0))
    }
}

/// 页号
pub trait PageNum: UsizeConvert + Ord {
    /// 对应的地址类型
    type TAddress: UsizeConvert;

    /// 包含 `addr` 的页
    fn from_addr_floor(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.as_usize() / page_size())
    }

    /// `addr` 向上取整后的页
    fn from_addr_ceil(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.as_usize().div_ceil(page_size()))
    }

    /// 页的起始地址
    fn start_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize(self.as_usize() * page_size())
    }

    /// 下一页的起始地址
    fn end_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize((self.as_usize() + 1) * page_size())
    }

    /// 向后偏移 `count` 页
    fn offset(self, count: usize) -> Self {
        Self::from_usize(self.as_usize() + count)
    }
}

macro_rules! impl_page_num {
    ($type:ident, $addr:ident) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl PageNum for $type {
            type TAddress = $addr;
        }
    };
}

/// 物理页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn, Paddr);

/// 虚拟页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn, Vaddr);

/// 虚拟页号范围 `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VpnRange {
    start: Vpn,
    end: Vpn,
}

impl VpnRange {
    /// 从起止页号构造
    pub fn new(start: Vpn, end: Vpn) -> Self {
        Self { start, end }
    }

    /// 从起始页号和页数构造
    pub fn from_start_len(start: Vpn, len: usize) -> Self {
        Self {
            start,
            end: start.offset(len),
        }
    }

    /// 起始页号
    pub fn start(&self) -> Vpn {
        self.start
    }

    /// 结束页号（不包含）
    pub fn end(&self) -> Vpn {
        self.end
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.end.0.saturating_sub(self.start.0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否包含 `vpn`
    pub fn contains(&self, vpn: Vpn) -> bool {
        self.start <= vpn && vpn < self.end
    }
}

impl IntoIterator for VpnRange {
    type Item = Vpn;
    type IntoIter = core::iter::Map<core::ops::Range<usize>, fn(usize) -> Vpn>;

    fn into_iter(self) -> Self::IntoIter {
        (self.start.0..self.end.0).map(Vpn as fn(usize) -> Vpn)
    }
}
