//! 初始用户栈上的参数布局
//!
//! 从栈顶向下依次放置（System V AMD64 约定）：
//!
//! ```text
//! 栈顶 → 各参数字符串（最右边的参数在最高处），以 NUL 结尾
//!        对齐到 8 字节的填充
//!        argv[argc] = NULL
//!        argv[argc-1] .. argv[0]
//! rsp  → 返回地址 0
//! ```
//!
//! 入口处 rdi = argc，rsi = argv（即 argv[0] 所在地址）。

use alloc::vec;
use alloc::vec::Vec;

use crate::error::LoadError;

const WORD: usize = core::mem::size_of::<u64>();

/// 构造好的参数区
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentStack {
    /// `[rsp, top)` 的内容
    pub bytes: Vec<u8>,
    /// 入口时的栈指针
    pub rsp: usize,
    /// 参数个数
    pub argc: usize,
    /// argv 数组的地址
    pub argv: usize,
}

struct StackWriter {
    base: usize,
    buf: Vec<u8>,
    sp: usize,
}

impl StackWriter {
    fn push(&mut self, data: &[u8]) -> Result<usize, LoadError> {
        let sp = self
            .sp
            .checked_sub(data.len())
            .filter(|sp| *sp >= self.base)
            .ok_or(LoadError::ArgumentsTooLong)?;
        let at = sp - self.base;
        self.buf[at..at + data.len()].copy_from_slice(data);
        self.sp = sp;
        Ok(sp)
    }

    fn push_word(&mut self, word: u64) -> Result<usize, LoadError> {
        self.push(&word.to_le_bytes())
    }

    fn align_down(&mut self) -> Result<(), LoadError> {
        let sp = self.sp - self.sp % WORD;
        if sp < self.base {
            return Err(LoadError::ArgumentsTooLong);
        }
        self.sp = sp;
        Ok(())
    }
}

impl ArgumentStack {
    /// 按空格切分 `cmd_line`（连续空格视为一个）并在 `top` 之下的一页内布置参数
    ///
    /// 参数区超出一页时返回 [`LoadError::ArgumentsTooLong`]。
    pub fn build(cmd_line: &str, top: usize, page_size: usize) -> Result<Self, LoadError> {
        let tokens: Vec<&str> = cmd_line.split(' ').filter(|t| !t.is_empty()).collect();
        let base = top - page_size;
        let mut writer = StackWriter {
            base,
            buf: vec![0u8; page_size],
            sp: top,
        };

        let mut addrs = vec![0usize; tokens.len()];
        for (i, token) in tokens.iter().enumerate().rev() {
            writer.push(&[0])?;
            addrs[i] = writer.push(token.as_bytes())?;
        }
        writer.align_down()?;
        writer.push_word(0)?;
        for addr in addrs.iter().rev() {
            writer.push_word(*addr as u64)?;
        }
        let argv = writer.sp;
        writer.push_word(0)?;

        let rsp = writer.sp;
        Ok(Self {
            bytes: writer.buf.split_off(rsp - base),
            rsp,
            argc: tokens.len(),
            argv,
        })
    }

    /// 参数区的大小
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// 参数区是否为空（不会出现：至少有返回地址与 NULL 结尾）
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::string::String;

    const TOP: usize = 0x4748_0000;
    const PAGE: usize = 4096;

    fn word_at(stack: &ArgumentStack, addr: usize) -> usize {
        let at = addr - stack.rsp;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&stack.bytes[at..at + 8]);
        u64::from_le_bytes(raw) as usize
    }

    fn string_at(stack: &ArgumentStack, addr: usize) -> String {
        let at = addr - stack.rsp;
        let len = stack.bytes[at..].iter().position(|b| *b == 0).unwrap();
        String::from_utf8(stack.bytes[at..at + len].to_vec()).unwrap()
    }

    fn argv(stack: &ArgumentStack) -> Vec<String> {
        (0..stack.argc)
            .map(|i| string_at(stack, word_at(stack, stack.argv + i * 8)))
            .collect()
    }

    #[test]
    fn test_layout_of_echo_command() {
        let stack = ArgumentStack::build("/bin/ls -l foo bar", TOP, PAGE).unwrap();
        assert_eq!(stack.argc, 4);
        assert_eq!(argv(&stack), ["/bin/ls", "-l", "foo", "bar"]);

        // 字符串从栈顶紧密排列，最右边的参数在最高处
        let bar = word_at(&stack, stack.argv + 3 * 8);
        assert_eq!(bar, TOP - 4);
        let ls = word_at(&stack, stack.argv);
        assert_eq!(ls, TOP - 4 - 4 - 3 - 8);

        assert_eq!(word_at(&stack, stack.argv + 4 * 8), 0);
        assert_eq!(stack.argv, stack.rsp + 8);
        assert_eq!(word_at(&stack, stack.rsp), 0);
        assert_eq!(stack.argv % 8, 0);
        assert_eq!(stack.rsp + stack.len(), TOP);
    }

    #[test]
    fn test_runs_of_spaces_are_one_separator() {
        let stack = ArgumentStack::build("  args-many   a  b ", TOP, PAGE).unwrap();
        assert_eq!(argv(&stack), ["args-many", "a", "b"]);
        assert_eq!(argv(&stack).join(" "), "args-many a b");
    }

    #[test]
    fn test_padding_is_zeroed() {
        let stack = ArgumentStack::build("abc", TOP, PAGE).unwrap();
        // "abc\0" 占 4 字节，再填充 4 字节
        let null_slot = stack.argv + 8;
        assert_eq!(null_slot + 8, TOP - 8);
        assert_eq!(&stack.bytes[stack.len() - 8..stack.len() - 4], &[0, 0, 0, 0]);
        assert_eq!(string_at(&stack, TOP - 4), "abc");
    }

    #[test]
    fn test_single_page_limit() {
        let long = "x".repeat(PAGE);
        assert_eq!(
            ArgumentStack::build(&long, TOP, PAGE),
            Err(LoadError::ArgumentsTooLong)
        );

        let many = ["ab"; 600].join(" ");
        assert_eq!(
            ArgumentStack::build(&many, TOP, PAGE),
            Err(LoadError::ArgumentsTooLong)
        );
    }
}
