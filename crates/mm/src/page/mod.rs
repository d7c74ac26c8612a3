//! 页抽象
//!
//! 每个用户虚拟页在补充页表中对应一个 [`Page`]。页的类型是三选一的 [`PageKind`]：
//!
//! - [`UninitPage`]：尚未访问，保存延迟加载描述
//! - [`AnonPage`]：匿名页，换出到交换区
//! - [`FilePage`]：mmap 文件页，换出时若脏则写回文件
//!
//! 未初始化页在第一次缺页时恰好转换一次，之后类型不再变化。
//! 三种类型统一提供换入、换出、销毁三个操作，补充页表在换出和拆除时
//! 不需要关心具体类型。

mod anon;
mod file;
mod frame;
mod uninit;

pub use anon::AnonPage;
pub use file::FilePage;
pub use frame::Frame;
pub use uninit::{LazyLoad, UninitPage};

use crate::address::Vpn;
use crate::file::OpenFile;
use crate::page_table::{PagingError, PagingResult};
use crate::swap::SwapStore;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

/// 页完成初始化后的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmType {
    /// 匿名页
    Anon,
    /// 文件页
    File,
}

/// 文件中对应一页的区间：从 `offset` 读 `read_bytes` 字节，其余 `zero_bytes` 字节补零
#[derive(Clone, Debug)]
pub struct FileRange {
    /// 来源文件
    pub file: Arc<OpenFile>,
    /// 文件偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 补零的字节数
    pub zero_bytes: usize,
}

impl FileRange {
    /// 用文件内容填充一页；读到的字节数不足 `read_bytes` 视为失败
    pub fn fill(&self, buf: &mut [u8]) -> PagingResult<()> {
        debug_assert_eq!(self.read_bytes + self.zero_bytes, buf.len());
        let (head, tail) = buf.split_at_mut(self.read_bytes);
        let n = self
            .file
            .read_at(self.offset, head)
            .map_err(|_| PagingError::IoError)?;
        if n != self.read_bytes {
            return Err(PagingError::IoError);
        }
        tail.fill(0);
        Ok(())
    }

    /// 把页的前 `read_bytes` 字节写回 `offset` 处
    ///
    /// 写回失败只记录日志，不阻止后续的拆除。
    pub fn write_back(&self, buf: &[u8]) {
        match self.file.write_at(self.offset, &buf[..self.read_bytes]) {
            Ok(n) if n == self.read_bytes => {}
            Ok(n) => log::error!(
                "write-back at offset {:#x}: wrote {} of {} bytes",
                self.offset,
                n,
                self.read_bytes
            ),
            Err(errno) => log::error!(
                "write-back at offset {:#x} failed: errno {}",
                self.offset,
                errno
            ),
        }
    }

    pub(crate) fn rebind(&self, file: Option<&Arc<OpenFile>>) -> Self {
        Self {
            file: file.cloned().unwrap_or_else(|| self.file.clone()),
            ..self.clone()
        }
    }
}

/// 页的类型及其私有状态
#[derive(Debug)]
pub enum PageKind {
    /// 未初始化
    Uninit(UninitPage),
    /// 匿名页
    Anon(AnonPage),
    /// 文件页
    File(FilePage),
}

/// 补充页表中的一页
#[derive(Debug)]
pub struct Page {
    vpn: Vpn,
    writable: bool,
    frame: Option<Frame>,
    kind: PageKind,
}

impl Page {
    pub(crate) fn new(vpn: Vpn, writable: bool, kind: PageKind) -> Self {
        Self {
            vpn,
            writable,
            frame: None,
            kind,
        }
    }

    /// 虚拟页号
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 用户是否可写
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 页的类型
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// 页当前（或初始化后）的类型
    pub fn vm_type(&self) -> VmType {
        match &self.kind {
            PageKind::Uninit(uninit) => uninit.load().target(),
            PageKind::Anon(_) => VmType::Anon,
            PageKind::File(_) => VmType::File,
        }
    }

    /// 是否仍未初始化
    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit(_))
    }

    /// 是否驻留在物理内存中
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// 占用的物理帧
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub(crate) fn frame_mut(&mut self) -> Option<&mut Frame> {
        self.frame.as_mut()
    }

    pub(crate) fn attach(&mut self, frame: Frame) {
        debug_assert!(self.frame.is_none());
        self.frame = Some(frame);
    }

    pub(crate) fn detach(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    /// 换入：把页内容装入 `frame`，不改变页的状态
    ///
    /// 帧映射成功后必须调用 [`Page::commit_swap_in`]；映射失败时页保持原样，
    /// 下一次缺页会重新装入同样的内容。
    pub(crate) fn swap_in(&self, frame: &mut Frame, swap: Option<&dyn SwapStore>) -> PagingResult<()> {
        let buf = frame.as_bytes_mut();
        match &self.kind {
            PageKind::Uninit(uninit) => match uninit.load() {
                LazyLoad::Zero => {
                    buf.fill(0);
                    Ok(())
                }
                LazyLoad::Segment(range) | LazyLoad::Mapped { range, .. } => range.fill(buf),
            },
            PageKind::Anon(anon) => anon.swap_in(buf, swap),
            PageKind::File(file) => file.swap_in(buf),
        }
    }

    /// 换入的帧已经映射：未初始化页转换为目标类型，匿名页交还交换槽位
    pub(crate) fn commit_swap_in(&mut self, swap: Option<&dyn SwapStore>) {
        let next = match &mut self.kind {
            PageKind::Uninit(uninit) => match uninit.load() {
                LazyLoad::Zero | LazyLoad::Segment(_) => PageKind::Anon(AnonPage::new()),
                LazyLoad::Mapped { mapping, range } => {
                    PageKind::File(FilePage::new(*mapping, range.clone()))
                }
            },
            PageKind::Anon(anon) => {
                anon.release_slot(swap);
                return;
            }
            PageKind::File(_) => return,
        };
        self.kind = next;
    }

    /// 换出：在回收 `frame` 之前保存页内容
    pub(crate) fn swap_out(&mut self, frame: &Frame, dirty: bool, swap: Option<&dyn SwapStore>) -> PagingResult<()> {
        match &mut self.kind {
            PageKind::Uninit(_) => Ok(()),
            PageKind::Anon(anon) => anon.swap_out(frame.as_bytes(), swap),
            PageKind::File(file) => {
                file.swap_out(frame.as_bytes(), dirty);
                Ok(())
            }
        }
    }

    /// 销毁：释放类型私有的资源（交换槽位等）
    pub(crate) fn destroy(&mut self, swap: Option<&dyn SwapStore>) {
        if let PageKind::Anon(anon) = &mut self.kind {
            anon.destroy(swap);
        }
    }

    /// 为子进程复制页的类型状态，映射页改绑到子进程的文件句柄
    pub(crate) fn fork_kind(&self, files: &BTreeMap<Vpn, Arc<OpenFile>>) -> PageKind {
        match &self.kind {
            PageKind::Uninit(uninit) => PageKind::Uninit(UninitPage::new(uninit.load().rebind(files))),
            PageKind::Anon(_) => PageKind::Anon(AnonPage::new()),
            PageKind::File(file) => PageKind::File(FilePage::new(
                file.mapping(),
                file.range().rebind(files.get(&file.mapping())),
            )),
        }
    }
}
