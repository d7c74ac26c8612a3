//! Mock 实现模块

pub mod arch;
pub mod fs;
pub mod mm;
pub mod page_table;
pub mod swap;
