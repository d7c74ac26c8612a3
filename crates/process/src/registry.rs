//! 进程注册表
//!
//! 维护“pid -> 进程控制块”的映射。进程在创建时插入，
//! 在被回收（或创建失败）时移除。

use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use mm::PageTableInner;
use sync::SpinLock;

use crate::process::{ParentLink, Pid, Process};

/// 进程注册表
pub struct ProcessRegistry<PT: PageTableInner> {
    processes: SpinLock<HashMap<Pid, Arc<Process<PT>>>>,
}

impl<PT: PageTableInner> ProcessRegistry<PT> {
    /// 创建一个空的注册表
    pub fn new() -> Self {
        Self {
            processes: SpinLock::new(HashMap::new()),
        }
    }

    /// 登记一个进程
    pub fn insert(&self, process: Arc<Process<PT>>) {
        self.processes.lock().insert(process.pid(), process);
    }

    /// 根据 pid 查找进程
    pub fn get(&self, pid: Pid) -> Option<Arc<Process<PT>>> {
        self.processes.lock().get(&pid).cloned()
    }

    /// 移除进程
    pub fn remove(&self, pid: Pid) -> Option<Arc<Process<PT>>> {
        self.processes.lock().remove(&pid)
    }

    /// 仍登记在 `parent` 名下的子进程
    pub fn children_of(&self, parent: Pid) -> Vec<Arc<Process<PT>>> {
        self.processes
            .lock()
            .values()
            .filter(|process| process.parent() == ParentLink::Parent(parent))
            .cloned()
            .collect()
    }

    /// 登记的进程数
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    /// 是否没有任何进程
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<PT: PageTableInner> Default for ProcessRegistry<PT> {
    fn default() -> Self {
        Self::new()
    }
}
