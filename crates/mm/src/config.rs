//! 内存布局配置 trait 定义和注册

use core::sync::atomic::{AtomicUsize, Ordering};

/// 内存布局常量
///
/// 由内核的平台层实现并注册。
pub trait MmConfig: Send + Sync {
    /// 页大小（x86-64 上为 4096）
    fn page_size(&self) -> usize;

    /// 初始用户栈的栈顶地址（USER_STACK），栈向低地址增长
    fn user_stack_top(&self) -> usize;

    /// 用户地址空间的上界（第一个内核地址）
    fn user_space_end(&self) -> usize;

    /// `vaddr` 是否位于用户地址空间
    fn is_user_vaddr(&self, vaddr: usize) -> bool {
        vaddr < self.user_space_end()
    }
}

static CONFIG_DATA: AtomicUsize = AtomicUsize::new(0);
static CONFIG_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册配置实现
///
/// # Safety
/// 必须在使用任何地址或页号换算之前、单线程环境下调用
pub unsafe fn register_config(config: &'static dyn MmConfig) {
    let ptr = config as *const dyn MmConfig;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn MmConfig, (usize, usize)>(ptr) };
    CONFIG_VTABLE.store(vtable, Ordering::Release);
    CONFIG_DATA.store(data, Ordering::Release);
}

/// 获取已注册的配置实现
///
/// # Panics
/// 如果尚未调用 [`register_config`] 注册实现，则 panic
#[inline]
pub fn mm_config() -> &'static dyn MmConfig {
    let data = CONFIG_DATA.load(Ordering::Acquire);
    let vtable = CONFIG_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("mm: MmConfig not registered");
    }
    // SAFETY: 重组 register_config 保存的 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn MmConfig>((data, vtable)) }
}
