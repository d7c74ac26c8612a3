//! 交换区的 Mock 实现

use std::collections::HashMap;
use std::sync::Mutex;

/// 以页为单位的内存交换区
#[derive(Debug)]
pub struct MockSwap {
    capacity: usize,
    inner: Mutex<SwapInner>,
}

#[derive(Debug, Default)]
struct SwapInner {
    slots: HashMap<usize, Vec<u8>>,
    next: usize,
}

impl MockSwap {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(SwapInner::default()),
        }
    }

    pub fn write(&self, page: &[u8]) -> Option<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.slots.len() >= self.capacity {
            return None;
        }
        let slot = inner.next;
        inner.next += 1;
        inner.slots.insert(slot, page.to_vec());
        Some(slot)
    }

    pub fn read(&self, slot: usize, page: &mut [u8]) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.slots.get(&slot) {
            Some(data) => {
                page.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    pub fn free(&self, slot: usize) {
        self.inner.lock().unwrap().slots.remove(&slot);
    }

    pub fn used(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }
}
