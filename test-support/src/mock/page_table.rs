//! 页表的 Mock 实现
//!
//! 用有序表记录 `vpn -> (ppn, flags)`，flags 是调用方自定义的位。
//! 每个宿主线程模拟一个 CPU，各自记录当前激活的页表根；根为 0 表示内核页表。

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static NEXT_ROOT: AtomicUsize = AtomicUsize::new(1);
static LIVE_TABLES: AtomicUsize = AtomicUsize::new(0);
static DESTROYED_WHILE_ACTIVE: AtomicUsize = AtomicUsize::new(0);
static FAIL_NEXT_CREATE: AtomicBool = AtomicBool::new(false);

thread_local! {
    static ACTIVE_ROOT: Cell<usize> = const { Cell::new(0) };
}

/// 一个页表项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockPte {
    pub ppn: usize,
    pub flags: u64,
}

/// Mock 页表
#[derive(Debug)]
pub struct MockPageTable {
    root: usize,
    entries: BTreeMap<usize, MockPte>,
}

impl MockPageTable {
    /// 创建新页表；若之前调用过 [`MockPageTable::fail_next_create`] 则返回 None。
    pub fn create() -> Option<Self> {
        if FAIL_NEXT_CREATE.swap(false, Ordering::SeqCst) {
            return None;
        }
        LIVE_TABLES.fetch_add(1, Ordering::SeqCst);
        Some(Self {
            root: NEXT_ROOT.fetch_add(1, Ordering::SeqCst),
            entries: BTreeMap::new(),
        })
    }

    /// 让下一次 [`MockPageTable::create`] 失败
    pub fn fail_next_create() {
        FAIL_NEXT_CREATE.store(true, Ordering::SeqCst);
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn map(&mut self, vpn: usize, ppn: usize, flags: u64) -> bool {
        if self.entries.contains_key(&vpn) {
            return false;
        }
        self.entries.insert(vpn, MockPte { ppn, flags });
        true
    }

    pub fn unmap(&mut self, vpn: usize) -> Option<MockPte> {
        self.entries.remove(&vpn)
    }

    pub fn get(&self, vpn: usize) -> Option<MockPte> {
        self.entries.get(&vpn).copied()
    }

    pub fn set_flags(&mut self, vpn: usize, flags: u64) -> bool {
        match self.entries.get_mut(&vpn) {
            Some(pte) => {
                pte.flags = flags;
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> Vec<(usize, MockPte)> {
        self.entries.iter().map(|(vpn, pte)| (*vpn, *pte)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 在当前线程上激活根为 `root` 的页表（0 表示内核页表）
    pub fn activate_root(root: usize) {
        ACTIVE_ROOT.with(|r| r.set(root));
    }

    /// 当前线程激活的页表根
    pub fn active_root() -> usize {
        ACTIVE_ROOT.with(|r| r.get())
    }

    /// 仍未销毁的页表数量
    pub fn live_tables() -> usize {
        LIVE_TABLES.load(Ordering::SeqCst)
    }

    /// 在仍处于激活状态时被销毁的页表数量，正确的拆除顺序下应始终为 0
    pub fn destroyed_while_active() -> usize {
        DESTROYED_WHILE_ACTIVE.load(Ordering::SeqCst)
    }
}

impl Drop for MockPageTable {
    fn drop(&mut self) {
        if Self::active_root() == self.root {
            DESTROYED_WHILE_ACTIVE.fetch_add(1, Ordering::SeqCst);
        }
        LIVE_TABLES.fetch_sub(1, Ordering::SeqCst);
    }
}
