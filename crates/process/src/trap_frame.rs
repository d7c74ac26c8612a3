//! 用户态寄存器快照
//!
//! 只保留进程子系统需要读写的寄存器：入口地址、栈指针、fork 的返回值，
//! 以及 System V 调用约定中承载 argc / argv 的 rdi / rsi。

/// RFLAGS.IF：中断使能
pub const FLAG_IF: u64 = 0x200;
/// RFLAGS 第 1 位，必须为 1
pub const FLAG_MBS: u64 = 0x2;
/// 用户代码段选择子
pub const SEL_UCSEG: u16 = 0x23;
/// 用户数据段选择子
pub const SEL_UDSEG: u16 = 0x1B;

/// 陷入时保存的用户态上下文
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// 指令指针
    pub rip: u64,
    /// 栈指针
    pub rsp: u64,
    /// 系统调用返回值
    pub rax: u64,
    /// 第一个参数
    pub rdi: u64,
    /// 第二个参数
    pub rsi: u64,
    /// 标志寄存器
    pub rflags: u64,
    /// 代码段
    pub cs: u16,
    /// 栈段
    pub ss: u16,
    /// 数据段
    pub ds: u16,
    /// 附加段
    pub es: u16,
}

impl TrapFrame {
    /// 新程序的初始上下文：用户段、开中断，其余寄存器为零
    pub fn new_user() -> Self {
        Self {
            rflags: FLAG_IF | FLAG_MBS,
            cs: SEL_UCSEG,
            ss: SEL_UDSEG,
            ds: SEL_UDSEG,
            es: SEL_UDSEG,
            ..Self::default()
        }
    }
}
