//! ELF64 可执行文件解析
//!
//! 只接受静态链接的 x86-64 可执行文件。先读出 ELF 头做全部校验，
//! 再按程序头表的范围读出文件前缀交给 `xmas_elf` 逐项解析。

use alloc::vec;
use alloc::vec::Vec;
use mm::OpenFile;
use xmas_elf::ElfFile;
use xmas_elf::header::{self, Class, Data, Machine, Version};
use xmas_elf::program::Type as SegmentType;

use crate::error::LoadError;

/// ELF64 文件头的大小
pub const ELF_HEADER_SIZE: usize = 64;
/// ELF64 程序头的大小
pub const PROGRAM_HEADER_SIZE: usize = 56;

/// 一个 LOAD 段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// 段在文件中的偏移
    pub offset: u64,
    /// 段的虚拟地址
    pub vaddr: u64,
    /// 段在文件中的大小
    pub file_size: u64,
    /// 段在内存中的大小
    pub mem_size: u64,
    /// 用户是否可写
    pub writable: bool,
}

/// 解析后的可执行文件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfImage {
    /// 入口地址
    pub entry: u64,
    /// 按程序头顺序排列的 LOAD 段
    pub segments: Vec<Segment>,
}

fn read_exact(file: &OpenFile, offset: usize, len: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; len];
    match file.read_at(offset, &mut buf) {
        Ok(n) if n == len => Some(buf),
        _ => None,
    }
}

/// 校验 ELF 头，返回 (入口地址, 程序头表偏移, 程序头数量)
fn check_header(head: &[u8], max_program_headers: usize) -> Result<(u64, u64, usize), LoadError> {
    let elf = ElfFile::new(head).map_err(|_| LoadError::BadHeader)?;
    let pt1 = &elf.header.pt1;
    let pt2 = &elf.header.pt2;
    let valid = matches!(pt1.class(), Class::SixtyFour)
        && matches!(pt1.data(), Data::LittleEndian)
        && matches!(pt1.version(), Version::Current)
        && matches!(pt2.type_().as_type(), header::Type::Executable)
        && matches!(pt2.machine().as_machine(), Machine::X86_64)
        && pt2.version() == 1
        && pt2.ph_entry_size() as usize == PROGRAM_HEADER_SIZE
        && pt2.ph_count() as usize <= max_program_headers;
    if !valid {
        return Err(LoadError::BadHeader);
    }
    Ok((pt2.entry_point(), pt2.ph_offset(), pt2.ph_count() as usize))
}

/// 读取并校验 `file` 的 ELF 头与程序头表
///
/// DYNAMIC、INTERP、SHLIB 段使整个文件被拒绝；除 LOAD 以外的其它段被忽略。
pub fn parse(file: &OpenFile, max_program_headers: usize) -> Result<ElfImage, LoadError> {
    let head = read_exact(file, 0, ELF_HEADER_SIZE).ok_or(LoadError::BadHeader)?;
    let (entry, ph_offset, ph_count) = check_header(&head, max_program_headers)?;

    let table_end = usize::try_from(ph_offset)
        .ok()
        .and_then(|start| start.checked_add(ph_count * PROGRAM_HEADER_SIZE))
        .filter(|end| *end <= file.len())
        .ok_or(LoadError::BadProgramHeader)?;
    let prefix = read_exact(file, 0, table_end.max(ELF_HEADER_SIZE)).ok_or(LoadError::BadProgramHeader)?;
    let elf = ElfFile::new(&prefix).map_err(|_| LoadError::BadHeader)?;

    let mut segments = Vec::new();
    for index in 0..ph_count {
        let ph = elf
            .program_header(index as u16)
            .map_err(|_| LoadError::BadProgramHeader)?;
        match ph.get_type() {
            Ok(SegmentType::Load) => segments.push(Segment {
                offset: ph.offset(),
                vaddr: ph.virtual_addr(),
                file_size: ph.file_size(),
                mem_size: ph.mem_size(),
                writable: ph.flags().is_write(),
            }),
            Ok(SegmentType::Dynamic | SegmentType::Interp | SegmentType::ShLib) => {
                return Err(LoadError::DynamicLinking);
            }
            _ => {}
        }
    }
    Ok(ElfImage { entry, segments })
}
