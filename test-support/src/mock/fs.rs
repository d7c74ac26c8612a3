//! 文件系统的 Mock 实现
//!
//! 文件内容保存在内存中；与教学内核的文件系统一样，写入不会扩展文件长度。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 一次成功写入的记录
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// 内存中的 inode
#[derive(Debug, Default)]
pub struct MockInode {
    data: Mutex<Vec<u8>>,
    deny_count: AtomicUsize,
    writes: Mutex<Vec<WriteRecord>>,
}

impl MockInode {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            ..Default::default()
        }
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// 写入被拒绝时返回 None
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Option<usize> {
        if self.deny_count.load(Ordering::SeqCst) > 0 {
            return None;
        }
        let mut data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Some(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        self.writes.lock().unwrap().push(WriteRecord {
            offset,
            data: buf[..n].to_vec(),
        });
        Some(n)
    }

    pub fn size(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn deny_write(&self) {
        self.deny_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn allow_write(&self) {
        let prev = self.deny_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "allow_write without matching deny_write");
    }

    pub fn deny_count(&self) -> usize {
        self.deny_count.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().unwrap().clone()
    }
}

/// Mock 文件系统：路径到 inode 的平铺映射
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: Mutex<HashMap<String, Arc<MockInode>>>,
    opens: AtomicUsize,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: &str, data: Vec<u8>) -> Arc<MockInode> {
        let inode = Arc::new(MockInode::new(data));
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), inode.clone());
        inode
    }

    pub fn lookup(&self, path: &str) -> Option<Arc<MockInode>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}
