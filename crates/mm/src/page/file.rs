//! 文件页：内容以文件中的一段区间为准

use super::FileRange;
use crate::address::Vpn;
use crate::page_table::PagingResult;

/// mmap 映射中的一页
#[derive(Clone, Debug)]
pub struct FilePage {
    mapping: Vpn,
    range: FileRange,
}

impl FilePage {
    pub(crate) fn new(mapping: Vpn, range: FileRange) -> Self {
        Self { mapping, range }
    }

    /// 所属映射的起始页
    pub fn mapping(&self) -> Vpn {
        self.mapping
    }

    /// 本页对应的文件区间
    pub fn range(&self) -> &FileRange {
        &self.range
    }

    pub(crate) fn swap_in(&self, buf: &mut [u8]) -> PagingResult<()> {
        self.range.fill(buf)
    }

    /// 换出前若页是脏的则写回文件
    pub(crate) fn swap_out(&self, buf: &[u8], dirty: bool) {
        if dirty {
            self.range.write_back(buf);
        }
    }
}
