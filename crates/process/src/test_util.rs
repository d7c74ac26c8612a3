// 本 crate 单元测试的公共初始化

extern crate std;

use std::sync::Once;
use test_support::mock::arch::MOCK_ARCH_OPS;

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
static INIT: Once = Once::new();

/// 注册自旋锁所需的架构操作
pub fn init() {
    INIT.call_once(|| unsafe { sync::register_arch_ops(&TEST_ARCH) });
}
