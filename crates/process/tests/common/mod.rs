// 进程集成测试的公共脚手架
//
// 每个模拟进程运行在自己的宿主线程上。“用户程序”是按陷入帧入口地址分派的闭包，
// 只通过公开的系统调用包装进入内核；访问用户内存走 `User::load` / `User::store`，
// 它们像 MMU 一样查页表，并经由进程管理器触发缺页。

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock, Weak};
use std::thread::{self, JoinHandle};

use mm::{
    ArchMmOps, MmConfig, MmInode, OpenFile, PageNum, PageTableInner, PagingError, PagingResult,
    Ppn, SwapSlot, SwapStore, UniversalPTEFlag, Vaddr, Vpn,
};
use process::syscall::{sys_exec, sys_fork, sys_mmap, sys_munmap, sys_wait};
use process::{
    Console, FileSystem, KILLED_STATUS, Pid, ProcError, ProcessConfig, ProcessManager, Scheduler,
    TrapFrame,
};
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::fs::{MockFileSystem, MockInode};
use test_support::mock::mm::{MOCK_MM_CONFIG, MOCK_MM_OPS, PhysArena};
use test_support::mock::page_table::MockPageTable;
use test_support::mock::swap::MockSwap;

pub const PAGE: usize = 4096;
pub const TEXT: u64 = 0x40_0000;
pub const DATA: u64 = 0x60_0000;
pub const DATA_INIT: &[u8] = b"initial data";
pub const DATA_SIZE: u64 = 0x3000;
pub const STACK_TOP: usize = 0x4748_0000;

// ---------------------------------------------------------------------------
// 平台包装类型

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn interrupt_enable_bit(&self) -> usize {
        MOCK_ARCH_OPS.interrupt_enable_bit()
    }
}

struct TestMmOps;

impl ArchMmOps for TestMmOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MOCK_MM_OPS.paddr_to_vaddr(paddr)
    }

    fn flush_tlb(&self, vaddr: usize) {
        MOCK_MM_OPS.flush_tlb(vaddr)
    }
}

struct TestConfig;

impl MmConfig for TestConfig {
    fn page_size(&self) -> usize {
        MOCK_MM_CONFIG.page_size()
    }

    fn user_stack_top(&self) -> usize {
        MOCK_MM_CONFIG.user_stack_top()
    }

    fn user_space_end(&self) -> usize {
        MOCK_MM_CONFIG.user_space_end()
    }
}

static TEST_ARCH: TestArch = TestArch;
static TEST_MM_OPS: TestMmOps = TestMmOps;
static TEST_CONFIG: TestConfig = TestConfig;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH);
        mm::register_arch_ops(&TEST_MM_OPS);
        mm::register_config(&TEST_CONFIG);
        let (start, end) = PhysArena::leak(8192);
        mm::init_frame_allocator(start, end);
    });
}

pub struct TestPageTable(MockPageTable);

impl PageTableInner for TestPageTable {
    fn new() -> PagingResult<Self> {
        MockPageTable::create()
            .map(TestPageTable)
            .ok_or(PagingError::FrameAllocFailed)
    }

    fn root_ppn(&self) -> Ppn {
        Ppn(self.0.root())
    }

    fn activate(ppn: Ppn) {
        MockPageTable::activate_root(ppn.0);
    }

    fn activate_kernel() {
        MockPageTable::activate_root(0);
    }

    fn map(&mut self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()> {
        if self.0.map(vpn.0, ppn.0, flags.bits() as u64) {
            Ok(())
        } else {
            Err(PagingError::AlreadyMapped)
        }
    }

    fn unmap(&mut self, vpn: Vpn) -> PagingResult<Ppn> {
        self.0
            .unmap(vpn.0)
            .map(|pte| Ppn(pte.ppn))
            .ok_or(PagingError::NotMapped)
    }

    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)> {
        self.0
            .get(vpn.0)
            .map(|pte| (Ppn(pte.ppn), UniversalPTEFlag::from_bits_truncate(pte.flags as usize)))
            .ok_or(PagingError::NotMapped)
    }

    fn update_flags(&mut self, vpn: Vpn, flags: UniversalPTEFlag) -> PagingResult<()> {
        if self.0.set_flags(vpn.0, flags.bits() as u64) {
            Ok(())
        } else {
            Err(PagingError::NotMapped)
        }
    }

    fn user_mappings(&self) -> Vec<(Vpn, Ppn, UniversalPTEFlag)> {
        self.0
            .entries()
            .into_iter()
            .map(|(vpn, pte)| {
                (
                    Vpn(vpn),
                    Ppn(pte.ppn),
                    UniversalPTEFlag::from_bits_truncate(pte.flags as usize),
                )
            })
            .collect()
    }
}

pub struct TestInode(pub Arc<MockInode>);

impl MmInode for TestInode {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        Ok(self.0.read_at(offset, buf))
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        self.0.write_at(offset, buf).ok_or(-1)
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn deny_write(&self) {
        self.0.deny_write()
    }

    fn allow_write(&self) {
        self.0.allow_write()
    }
}

/// 基于内存 inode 的 `OpenFile`，供装载器层面的测试使用
pub fn open_bytes(data: Vec<u8>) -> Arc<OpenFile> {
    init();
    OpenFile::new(Arc::new(TestInode(Arc::new(MockInode::new(data)))))
}

pub struct TestSwap(pub MockSwap);

impl SwapStore for TestSwap {
    fn write(&self, page: &[u8]) -> Option<SwapSlot> {
        self.0.write(page).map(SwapSlot)
    }

    fn read(&self, slot: SwapSlot, page: &mut [u8]) -> bool {
        self.0.read(slot.0, page)
    }

    fn free(&self, slot: SwapSlot) {
        self.0.free(slot.0)
    }
}

pub struct TestFs(pub MockFileSystem);

impl FileSystem for TestFs {
    fn open(&self, path: &str) -> Option<Arc<dyn MmInode>> {
        self.0
            .lookup(path)
            .map(|inode| Arc::new(TestInode(inode)) as Arc<dyn MmInode>)
    }
}

#[derive(Default)]
pub struct TestConsole(Mutex<String>);

impl TestConsole {
    pub fn output(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

impl Console for TestConsole {
    fn write_str(&self, s: &str) {
        self.0.lock().unwrap().push_str(s);
    }
}

// ---------------------------------------------------------------------------
// 调度器与用户程序

pub type Manager = ProcessManager<TestPageTable>;

/// 用户程序把控制交还内核时要做的事
pub enum Step {
    /// 以该状态退出
    Exit(i32),
    /// 从 `frame.rip` 继续（exec 成功之后）
    Jump,
}

pub type Program = Arc<dyn Fn(&mut User) -> Step + Send + Sync>;

thread_local! {
    static CURRENT: Cell<Option<Pid>> = const { Cell::new(None) };
}

#[derive(Default)]
pub struct TestScheduler {
    manager: OnceLock<Weak<Manager>>,
    programs: Mutex<HashMap<u64, Program>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pub refuse_spawn: AtomicBool,
}

impl TestScheduler {
    pub fn join_all(&self) {
        loop {
            let handles = std::mem::take(&mut *self.threads.lock().unwrap());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                handle.join().unwrap();
            }
        }
    }
}

impl Scheduler for TestScheduler {
    fn spawn(&self, pid: Pid, name: &str, entry: Box<dyn FnOnce() + Send>) -> bool {
        if self.refuse_spawn.load(Ordering::SeqCst) {
            return false;
        }
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CURRENT.with(|current| current.set(Some(pid)));
                entry();
            });
        match spawned {
            Ok(handle) => {
                self.threads.lock().unwrap().push(handle);
                true
            }
            Err(_) => false,
        }
    }

    fn current_pid(&self) -> Option<Pid> {
        CURRENT.with(|current| current.get())
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn enter_user(&self, frame: TrapFrame) -> i32 {
        let Some(manager) = self.manager.get().and_then(Weak::upgrade) else {
            return KILLED_STATUS;
        };
        let mut user = User { manager, frame };
        loop {
            let program = self.programs.lock().unwrap().get(&user.frame.rip).cloned();
            let Some(program) = program else {
                return KILLED_STATUS;
            };
            let step = program(&mut user);
            if user.manager.is_killed() {
                return KILLED_STATUS;
            }
            match step {
                Step::Exit(status) => return status,
                Step::Jump => {}
            }
        }
    }
}

/// 用户程序眼中的自己
pub struct User {
    manager: Arc<Manager>,
    pub frame: TrapFrame,
}

impl User {
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn pid(&self) -> Pid {
        self.manager.current_pid()
    }

    /// fork；子进程从 `child_entry` 开始，`rax == 0`
    pub fn fork(&self, name: &str, child_entry: u64) -> isize {
        let mut frame = self.frame;
        frame.rip = child_entry;
        sys_fork(&self.manager, name, &frame)
    }

    pub fn exec(&mut self, cmd_line: &str) -> isize {
        sys_exec(&self.manager, cmd_line, &mut self.frame)
    }

    pub fn wait(&self, pid: isize) -> isize {
        sys_wait(&self.manager, pid as Pid)
    }

    pub fn open(&self, path: &str) -> Option<usize> {
        self.manager.open(path).ok()
    }

    pub fn close(&self, fd: usize) -> bool {
        self.manager.close(fd).is_ok()
    }

    pub fn mmap(&self, addr: usize, length: usize, writable: bool, fd: usize, offset: usize) -> usize {
        sys_mmap(&self.manager, addr, length, writable, fd, offset)
    }

    pub fn munmap(&self, addr: usize) -> isize {
        sys_munmap(&self.manager, addr)
    }

    /// 像 MMU 一样把 `addr` 解析成宿主指针，必要时触发缺页
    fn access(&self, addr: usize, write: bool) -> Result<*mut u8, ProcError> {
        let process = self.manager.current().ok_or(ProcError::NoAddressSpace)?;
        let vpn = Vpn::from_addr_floor(Vaddr(addr));
        loop {
            let entry = process.with_space(|space| space.walk(vpn).ok()).flatten();
            let Some((ppn, flags)) = entry else {
                self.manager.handle_page_fault(addr, write)?;
                continue;
            };
            if write && !flags.contains(UniversalPTEFlag::WRITEABLE) {
                self.manager.handle_page_fault(addr, write)?;
                continue;
            }
            let mut set = UniversalPTEFlag::ACCESSED;
            if write {
                set |= UniversalPTEFlag::DIRTY;
            }
            process.with_space(|space| space.table_mut().update_flags(vpn, flags | set));
            let base = ppn.start_addr().to_vaddr().0;
            return Ok((base + addr % PAGE) as *mut u8);
        }
    }

    pub fn load(&self, addr: usize, len: usize) -> Result<Vec<u8>, ProcError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let at = addr + out.len();
            let n = (PAGE - at % PAGE).min(len - out.len());
            let ptr = self.access(at, false)?;
            // SAFETY: 帧属于本进程，直接映射区为恒等映射
            out.extend_from_slice(unsafe { std::slice::from_raw_parts(ptr, n) });
        }
        Ok(out)
    }

    pub fn store(&self, addr: usize, data: &[u8]) -> Result<(), ProcError> {
        let mut done = 0;
        while done < data.len() {
            let at = addr + done;
            let n = (PAGE - at % PAGE).min(data.len() - done);
            let ptr = self.access(at, true)?;
            // SAFETY: 同 load
            unsafe { std::ptr::copy_nonoverlapping(data[done..].as_ptr(), ptr, n) };
            done += n;
        }
        Ok(())
    }

    pub fn load_u64(&self, addr: usize) -> Result<u64, ProcError> {
        let bytes = self.load(addr, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn load_c_str(&self, mut addr: usize) -> Result<String, ProcError> {
        let mut out = Vec::new();
        loop {
            let byte = self.load(addr, 1)?[0];
            if byte == 0 {
                return Ok(String::from_utf8(out).unwrap());
            }
            out.push(byte);
            addr += 1;
        }
    }

    /// 入口处看到的 `argv[0..argc]`
    pub fn args(&self) -> Result<Vec<String>, ProcError> {
        let argc = self.frame.rdi as usize;
        let argv = self.frame.rsi as usize;
        (0..argc)
            .map(|i| {
                let ptr = self.load_u64(argv + i * 8)? as usize;
                self.load_c_str(ptr)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 测试台

pub struct Harness {
    pub manager: Arc<Manager>,
    pub scheduler: Arc<TestScheduler>,
    pub fs: Arc<TestFs>,
    pub console: Arc<TestConsole>,
}

impl Harness {
    pub fn new(config: ProcessConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_swap(config: ProcessConfig, swap: Arc<TestSwap>) -> Self {
        Self::build(config, Some(swap))
    }

    fn build(config: ProcessConfig, swap: Option<Arc<TestSwap>>) -> Self {
        init();
        let scheduler = Arc::new(TestScheduler::default());
        let fs = Arc::new(TestFs(MockFileSystem::new()));
        let console = Arc::new(TestConsole::default());
        let mut manager = ProcessManager::new(config, scheduler.clone(), fs.clone(), console.clone());
        if let Some(swap) = swap {
            manager = manager.with_swap(swap);
        }
        let manager = Arc::new(manager);
        scheduler.manager.set(Arc::downgrade(&manager)).ok().unwrap();
        Self {
            manager,
            scheduler,
            fs,
            console,
        }
    }

    /// 在 `entry` 处登记程序，不安装可执行文件
    pub fn program(&self, entry: u64, program: impl Fn(&mut User) -> Step + Send + Sync + 'static) {
        self.scheduler
            .programs
            .lock()
            .unwrap()
            .insert(entry, Arc::new(program));
    }

    pub fn install(&self, path: &str, image: Vec<u8>) -> Arc<MockInode> {
        self.fs.0.add(path, image)
    }

    /// 安装入口为 `entry` 的标准可执行文件并登记程序
    pub fn install_program(
        &self,
        path: &str,
        entry: u64,
        program: impl Fn(&mut User) -> Step + Send + Sync + 'static,
    ) -> Arc<MockInode> {
        self.program(entry, program);
        self.install(path, standard_elf(entry))
    }

    /// 以 `cmd_line` 启动初始进程，并在内核上下文中等待它
    pub fn run(&self, cmd_line: &str) -> i32 {
        let pid = self.manager.create_initd(cmd_line).unwrap();
        let status = self.manager.wait(pid).unwrap();
        self.scheduler.join_all();
        status
    }

    pub fn output(&self) -> String {
        self.console.output()
    }
}

/// 收集用户程序内部报告的值
pub fn recorder<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// ELF 镜像

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_GNU_STACK: u32 = 0x6474_e551;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct PhdrEntry {
    kind: u32,
    vaddr: u64,
    data: Vec<u8>,
    mem_size: u64,
    writable: bool,
}

pub struct ElfBuilder {
    entry: u64,
    phdrs: Vec<PhdrEntry>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            phdrs: Vec::new(),
        }
    }

    pub fn segment(mut self, vaddr: u64, data: &[u8], mem_size: u64, writable: bool) -> Self {
        self.phdrs.push(PhdrEntry {
            kind: PT_LOAD,
            vaddr,
            data: data.to_vec(),
            mem_size,
            writable,
        });
        self
    }

    /// 添加一个类型为 `kind`、没有内容的程序头
    pub fn header(mut self, kind: u32) -> Self {
        self.phdrs.push(PhdrEntry {
            kind,
            vaddr: 0,
            data: Vec::new(),
            mem_size: 0,
            writable: false,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0u8; 64 + 56 * self.phdrs.len()];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // 64-bit
        out[5] = 1; // little endian
        out[6] = 1;
        out[16..18].copy_from_slice(&2u16.to_le_bytes());
        out[18..20].copy_from_slice(&0x3eu16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&64u64.to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[56..58].copy_from_slice(&(self.phdrs.len() as u16).to_le_bytes());
        out[58..60].copy_from_slice(&64u16.to_le_bytes());

        let mut cursor = PAGE;
        for (i, ph) in self.phdrs.iter().enumerate() {
            let offset = if ph.kind == PT_LOAD {
                cursor + (ph.vaddr as usize % PAGE)
            } else {
                0
            };
            if ph.kind == PT_LOAD {
                let end = offset + ph.data.len();
                if out.len() < end {
                    out.resize(end, 0);
                }
                out[offset..end].copy_from_slice(&ph.data);
                cursor = end.div_ceil(PAGE) * PAGE + PAGE;
            }
            let flags = PF_R | PF_X * u32::from(!ph.writable) | PF_W * u32::from(ph.writable);
            let at = 64 + i * 56;
            let entry = &mut out[at..at + 56];
            entry[0..4].copy_from_slice(&ph.kind.to_le_bytes());
            entry[4..8].copy_from_slice(&flags.to_le_bytes());
            entry[8..16].copy_from_slice(&(offset as u64).to_le_bytes());
            entry[16..24].copy_from_slice(&ph.vaddr.to_le_bytes());
            entry[24..32].copy_from_slice(&ph.vaddr.to_le_bytes());
            entry[32..40].copy_from_slice(&(ph.data.len() as u64).to_le_bytes());
            entry[40..48].copy_from_slice(&ph.mem_size.to_le_bytes());
            entry[48..56].copy_from_slice(&(PAGE as u64).to_le_bytes());
        }
        out
    }
}

/// `TEXT` 处一个只读代码页，`DATA` 处一个尾部补零的可写数据段
pub fn standard_elf(entry: u64) -> Vec<u8> {
    ElfBuilder::new(entry)
        .segment(TEXT, &[0x90; 64], 64, false)
        .segment(DATA, DATA_INIT, DATA_SIZE, true)
        .header(PT_GNU_STACK)
        .build()
}
