//! 文件描述符表
//!
//! 进程级的文件描述符管理：
//!
//! - `alloc()` 分配“最小可用 fd”；0 和 1 留给控制台，普通文件从 2 开始
//! - `duplicate()` 用于 fork：逐个复制句柄，父子进程的游标与关闭互不影响
//! - `take_all()` 用于进程退出：一次性取走全部句柄

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use mm::OpenFile;
use sync::SpinLock;

use crate::error::ProcError;

/// 第一个分配给普通文件的描述符
pub const FIRST_FILE_FD: usize = 2;

/// 文件描述符表
pub struct FdTable {
    /// 下标 i 对应描述符 `FIRST_FILE_FD + i`
    files: SpinLock<Vec<Option<Arc<OpenFile>>>>,
    /// 最大文件描述符数量
    max_fds: usize,
}

impl fmt::Debug for FdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let files = self.files.lock();
        let used = files.iter().filter(|slot| slot.is_some()).count();
        f.debug_struct("FdTable")
            .field("max_fds", &self.max_fds)
            .field("slots", &files.len())
            .field("used", &used)
            .finish()
    }
}

impl FdTable {
    /// 创建新的文件描述符表
    pub fn new(max_fds: usize) -> Self {
        Self {
            files: SpinLock::new(Vec::new()),
            max_fds,
        }
    }

    /// 分配一个新的文件描述符
    pub fn alloc(&self, file: Arc<OpenFile>) -> Result<usize, ProcError> {
        let mut files = self.files.lock();

        // 查找最小可用 FD
        if let Some(idx) = files.iter().position(Option::is_none) {
            files[idx] = Some(file);
            return Ok(FIRST_FILE_FD + idx);
        }

        // 如果没有空闲槽位，扩展数组
        let fd = FIRST_FILE_FD + files.len();
        if fd >= self.max_fds {
            return Err(ProcError::TooManyFiles);
        }
        files.push(Some(file));
        Ok(fd)
    }

    /// 获取文件对象
    pub fn get(&self, fd: usize) -> Result<Arc<OpenFile>, ProcError> {
        let files = self.files.lock();
        fd.checked_sub(FIRST_FILE_FD)
            .and_then(|idx| files.get(idx))
            .and_then(|slot| slot.clone())
            .ok_or(ProcError::BadFd)
    }

    /// 关闭文件描述符
    pub fn close(&self, fd: usize) -> Result<(), ProcError> {
        let file = {
            let mut files = self.files.lock();
            fd.checked_sub(FIRST_FILE_FD)
                .and_then(|idx| files.get_mut(idx))
                .and_then(Option::take)
                .ok_or(ProcError::BadFd)?
        };
        // 句柄可能在这里被析构，不要持锁
        drop(file);
        Ok(())
    }

    /// 取走并清空所有已打开的文件描述符
    pub fn take_all(&self) -> Vec<(usize, Arc<OpenFile>)> {
        let mut files = self.files.lock();
        let out = files
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.take().map(|file| (FIRST_FILE_FD + idx, file)))
            .collect();
        files.clear();
        out
    }

    /// 已打开的描述符数量
    pub fn len(&self) -> usize {
        self.files.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// 是否没有打开任何文件
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 复制整个文件描述符表（用于 fork）
    ///
    /// 描述符编号保持不变，每个句柄都被复制为独立的句柄。
    pub fn duplicate(&self) -> Self {
        let files = self
            .files
            .lock()
            .iter()
            .map(|slot| slot.as_ref().map(|file| file.duplicate()))
            .collect();
        Self {
            files: SpinLock::new(files),
            max_fds: self.max_fds,
        }
    }

    /// 用 `parent` 的副本替换本表的全部内容
    pub fn copy_from(&self, parent: &FdTable) {
        let files = parent.duplicate().files.into_inner();
        let old = core::mem::replace(&mut *self.files.lock(), files);
        drop(old);
    }
}
