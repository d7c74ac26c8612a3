//! 匿名页：没有文件后备，换出时写入交换区

use crate::page_table::{PagingError, PagingResult};
use crate::swap::{SwapSlot, SwapStore};

/// 匿名页
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub(crate) fn new() -> Self {
        Self { slot: None }
    }

    /// 被换出时所在的交换槽位
    pub fn slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    /// 读出页内容；从未换出过的页是全零页
    ///
    /// 槽位保持占用，直到 [`AnonPage::release_slot`]；fork 复制同样走这里。
    pub(crate) fn swap_in(&self, buf: &mut [u8], swap: Option<&dyn SwapStore>) -> PagingResult<()> {
        match (self.slot, swap) {
            (None, _) => {
                buf.fill(0);
                Ok(())
            }
            (Some(slot), Some(swap)) if swap.read(slot, buf) => Ok(()),
            _ => Err(PagingError::SwapFailed),
        }
    }

    /// 内容已经映射进帧之后释放槽位
    pub(crate) fn release_slot(&mut self, swap: Option<&dyn SwapStore>) {
        if let (Some(slot), Some(swap)) = (self.slot.take(), swap) {
            swap.free(slot);
        }
    }

    pub(crate) fn swap_out(&mut self, buf: &[u8], swap: Option<&dyn SwapStore>) -> PagingResult<()> {
        let swap = swap.ok_or(PagingError::SwapFailed)?;
        self.slot = Some(swap.write(buf).ok_or(PagingError::SwapFailed)?);
        Ok(())
    }

    pub(crate) fn destroy(&mut self, swap: Option<&dyn SwapStore>) {
        self.release_slot(swap);
    }
}
