//! 用户进程子系统
//!
//! 负责用户进程从创建到回收的整个生命周期：
//!
//! - [`ProcessManager`]：create_initd / fork / exec / wait / exit，以及缺页与 mmap 的入口
//! - [`loader`]：ELF64 可执行文件的校验与装载、初始用户栈上的参数布局
//! - [`Process`]：进程控制块，父子之间的三个握手信号量都挂在子进程上
//! - [`FdTable`]：进程级文件描述符表
//! - [`syscall`]：把结构化结果转换成系统调用约定的哨兵值
//!
//! # 外部协作者
//!
//! 调度、文件系统和控制台输出不在本 crate 内实现，通过 [`Scheduler`]、
//! [`FileSystem`]、[`Console`] 三个 trait 注入 [`ProcessManager`]。
//! 内存相关的协作者（页表、帧、交换区）见 `mm` crate。

#![no_std]

extern crate alloc;

mod config;
mod error;
mod fd_table;
mod manager;
mod ops;
mod pid_allocator;
mod process;
mod registry;
mod trap_frame;

#[cfg(test)]
mod test_util;

pub mod loader;
pub mod syscall;

pub use config::{PagingMode, ProcessConfig, ProtectionFaultPolicy};
pub use error::{KILLED_STATUS, LoadError, PID_ERROR, ProcError};
pub use fd_table::FdTable;
pub use manager::{KERNEL_PID, ProcessManager};
pub use ops::{Console, FileSystem, Scheduler};
pub use pid_allocator::PidAllocator;
pub use process::{ParentLink, Pid, Process, ProcessState};
pub use registry::ProcessRegistry;
pub use trap_frame::TrapFrame;
