//! 交换区接口
//!
//! 匿名页被换出时整页写入一个槽位，换入后槽位即被释放。
//! 磁盘布局由实现者决定。

/// 交换槽位编号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwapSlot(pub usize);

/// 匿名页的后备存储
pub trait SwapStore: Send + Sync {
    /// 写出一整页，返回存放它的槽位；交换区已满时返回 None
    fn write(&self, page: &[u8]) -> Option<SwapSlot>;

    /// 将槽位内容读入 `page`，槽位保持占用
    fn read(&self, slot: SwapSlot, page: &mut [u8]) -> bool;

    /// 释放槽位
    fn free(&self, slot: SwapSlot);
}
