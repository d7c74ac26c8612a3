//! 文件接口
//!
//! [`MmInode`] 是文件系统提供给本子系统的最小 I/O 接口；
//! [`OpenFile`] 在其上加一个读写游标和“禁止写入”状态，
//! 对应一次 open 得到的文件句柄。

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use sync::SpinLock;

/// 可用于内存映射读写的 Inode 接口
///
/// 此 trait 抽象了文件 I/O 所需的最小接口。读写按字节精确：
/// 越过文件末尾的部分不读也不写，返回实际处理的字节数。
pub trait MmInode: Send + Sync {
    /// 从指定偏移读取数据到缓冲区
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度（字节）
    fn size(&self) -> usize;

    /// 禁止写入（可嵌套）
    fn deny_write(&self);

    /// 撤销一次 [`MmInode::deny_write`]
    fn allow_write(&self);
}

/// 已打开的文件句柄
///
/// 多个句柄可以共享同一个 inode，各自拥有独立的游标。
/// 若句柄调用过 [`OpenFile::deny_write`]，析构时自动撤销。
pub struct OpenFile {
    inode: Arc<dyn MmInode>,
    pos: SpinLock<usize>,
    denied: AtomicBool,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("pos", &*self.pos.lock())
            .field("denied", &self.denied.load(Ordering::Relaxed))
            .finish()
    }
}

impl OpenFile {
    /// 打开 inode，游标位于 0
    pub fn new(inode: Arc<dyn MmInode>) -> Arc<Self> {
        Self::with_pos(inode, 0)
    }

    fn with_pos(inode: Arc<dyn MmInode>, pos: usize) -> Arc<Self> {
        Arc::new(Self {
            inode,
            pos: SpinLock::new(pos),
            denied: AtomicBool::new(false),
        })
    }

    /// 底层 inode
    pub fn inode(&self) -> &Arc<dyn MmInode> {
        &self.inode
    }

    /// 文件长度
    pub fn len(&self) -> usize {
        self.inode.size()
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从 `offset` 读满 `buf`，遇到文件末尾提前结束，返回读到的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.inode.read_at(offset + done, &mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// 从 `offset` 写入 `buf`，遇到文件末尾提前结束，返回写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.inode.write_at(offset + done, &buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// 从游标处读取并推进游标
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, isize> {
        let mut pos = self.pos.lock();
        let n = self.read_at(*pos, buf)?;
        *pos += n;
        Ok(n)
    }

    /// 在游标处写入并推进游标
    pub fn write(&self, buf: &[u8]) -> Result<usize, isize> {
        let mut pos = self.pos.lock();
        let n = self.write_at(*pos, buf)?;
        *pos += n;
        Ok(n)
    }

    /// 移动游标
    pub fn seek(&self, pos: usize) {
        *self.pos.lock() = pos;
    }

    /// 当前游标
    pub fn tell(&self) -> usize {
        *self.pos.lock()
    }

    /// 对同一 inode 打开一个新句柄：游标为 0，不继承禁止写入状态
    pub fn reopen(&self) -> Arc<Self> {
        Self::new(self.inode.clone())
    }

    /// 复制句柄：游标与禁止写入状态都与原句柄相同，但此后互不影响
    pub fn duplicate(&self) -> Arc<Self> {
        let dup = Self::with_pos(self.inode.clone(), self.tell());
        if self.denied.load(Ordering::Acquire) {
            dup.deny_write();
        }
        dup
    }

    /// 禁止通过任何句柄写入该文件，直到本句柄撤销或被关闭
    pub fn deny_write(&self) {
        if !self.denied.swap(true, Ordering::AcqRel) {
            self.inode.deny_write();
        }
    }

    /// 撤销本句柄的禁止写入
    pub fn allow_write(&self) {
        if self.denied.swap(false, Ordering::AcqRel) {
            self.inode.allow_write();
        }
    }

    /// 本句柄是否禁止了写入
    pub fn denies_write(&self) -> bool {
        self.denied.load(Ordering::Acquire)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.allow_write();
    }
}
