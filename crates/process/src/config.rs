//! 进程子系统的策略配置

pub use mm::PagingMode;

/// 对已驻留页或只读页的非法访问（保护性缺页）如何处理
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProtectionFaultPolicy {
    /// 以 [`crate::KILLED_STATUS`] 终止进程
    #[default]
    Kill,
    /// 把错误交还给陷入处理层，由它决定如何通知用户程序
    Report,
}

/// [`crate::ProcessManager`] 的配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessConfig {
    /// 用户页的装载方式；[`PagingMode::Eager`] 下不支持 mmap
    pub paging: PagingMode,
    /// 保护性缺页的处理策略
    pub protection_faults: ProtectionFaultPolicy,
    /// 每个进程最多打开的文件数
    pub max_fds: usize,
    /// 每个进程同时驻留的页数上限，`None` 表示只受物理内存限制
    pub max_resident_pages: Option<usize>,
    /// 可执行文件中程序头数量的上限，超过视为格式错误
    pub max_program_headers: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            paging: PagingMode::Demand,
            protection_faults: ProtectionFaultPolicy::Kill,
            max_fds: 128,
            max_resident_pages: None,
            max_program_headers: 1024,
        }
    }
}
