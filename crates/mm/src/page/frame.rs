//! 用户页当前占用的物理帧

use crate::address::{Ppn, Vpn};
use crate::frame_allocator::FrameTracker;

/// 正在为某个虚拟页提供存储的物理帧
///
/// 除了硬件页表项中的脏位，帧自身还记录一份“内核写过”的标志：
/// 内核经直接映射区写入时不会设置用户页表项的脏位，写回判断必须同时检查两处。
#[derive(Debug)]
pub struct Frame {
    tracker: FrameTracker,
    owner: Vpn,
    kernel_dirty: bool,
}

impl Frame {
    pub(crate) fn new(tracker: FrameTracker, owner: Vpn) -> Self {
        Self {
            tracker,
            owner,
            kernel_dirty: false,
        }
    }

    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.tracker.ppn()
    }

    /// 占用此帧的虚拟页
    pub fn owner(&self) -> Vpn {
        self.owner
    }

    /// 帧内容
    pub fn as_bytes(&self) -> &[u8] {
        self.tracker.as_bytes()
    }

    /// 可写的帧内容；不会自动设置脏标志
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.tracker.as_bytes_mut()
    }

    /// 内核是否写过此帧
    pub fn is_kernel_dirty(&self) -> bool {
        self.kernel_dirty
    }

    /// 记录内核写入
    pub fn mark_kernel_dirty(&mut self) {
        self.kernel_dirty = true;
    }

    pub(crate) fn set_kernel_dirty(&mut self, dirty: bool) {
        self.kernel_dirty = dirty;
    }

    pub(crate) fn into_tracker(self) -> FrameTracker {
        self.tracker
    }
}
