//! 尚未被访问过的页
//!
//! 只保存一个可克隆的延迟加载描述，第一次缺页时据此变成匿名页或文件页。

use super::{FileRange, VmType};
use crate::address::Vpn;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::file::OpenFile;

/// 延迟加载描述
#[derive(Clone, Debug)]
pub enum LazyLoad {
    /// 全零页（用户栈、匿名内存）
    Zero,
    /// 可执行文件的一个段页：首次加载后成为匿名页
    Segment(FileRange),
    /// mmap 的一页：始终以文件为准
    Mapped {
        /// 所属映射的起始页
        mapping: Vpn,
        /// 本页对应的文件区间
        range: FileRange,
    },
}

impl LazyLoad {
    /// 首次加载后页的类型
    pub fn target(&self) -> VmType {
        match self {
            LazyLoad::Zero | LazyLoad::Segment(_) => VmType::Anon,
            LazyLoad::Mapped { .. } => VmType::File,
        }
    }

    /// 复制描述，并把映射页改绑到 `files` 中同一映射的句柄上
    pub(crate) fn rebind(&self, files: &BTreeMap<Vpn, Arc<OpenFile>>) -> Self {
        match self {
            LazyLoad::Mapped { mapping, range } => LazyLoad::Mapped {
                mapping: *mapping,
                range: range.rebind(files.get(mapping)),
            },
            other => other.clone(),
        }
    }
}

/// 未初始化页
#[derive(Clone, Debug)]
pub struct UninitPage {
    load: LazyLoad,
}

impl UninitPage {
    pub(crate) fn new(load: LazyLoad) -> Self {
        Self { load }
    }

    /// 延迟加载描述
    pub fn load(&self) -> &LazyLoad {
        &self.load
    }
}
