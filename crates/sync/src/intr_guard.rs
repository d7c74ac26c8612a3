//! 中断保护器
//!
//! 切换页表根、更新内核栈记录等操作必须与本地时钟中断互斥，
//! 否则中断处理程序可能在半途重新激活一张正在销毁的页表。
//! 这里只处理本地 CPU；跨 CPU 的数据仍需配合自旋锁。

use crate::arch_ops;

/// 中断保护器：创建时关中断，销毁时恢复之前的状态。
///
/// 可以嵌套使用，内层保护器释放时不会提前打开中断。
///
/// # 示例
/// ```ignore
/// {
///     let _guard = IntrGuard::new();
///     // 安装新的页表根
/// }
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 关闭本地中断并记录进入前的标志。
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 会在 Drop 中原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入临界区前中断是否处于启用状态。
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().interrupt_enable_bit() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 由 new() 中的 read_and_disable_interrupts 返回
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
