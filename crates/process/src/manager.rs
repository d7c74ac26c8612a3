//! 进程生命周期管理
//!
//! [`ProcessManager`] 持有全部进程与外部协作者，负责：
//!
//! - 创建第一个用户进程（`create_initd`）
//! - fork：子进程在自己的执行单元里复制父进程，父进程等 `fork_done`
//! - exec：无条件销毁旧地址空间后装载新程序
//! - wait / exit：经 `exit_notify` 与 `reap_permit` 完成退出状态的交接
//! - 用户缺页、mmap / munmap、文件打开与关闭
//!
//! # 资源释放顺序
//!
//! 退出时先打印终止信息，再关闭文件、放行孤儿子进程、销毁地址空间，
//! 最后才 up `exit_notify`。因此父进程在 wait 返回时，子进程已经不再持有任何资源；
//! 子进程的 PCB 则要等父进程 up `reap_permit` 之后才从注册表中移除。

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use lazy_static::lazy_static;
use mm::{
    AddressSpace, FaultError, OpenFile, PageNum, PageTableInner, PagingError, SwapStore, Vaddr, Vpn,
};
use sync::SpinLock;

use crate::config::{ProcessConfig, ProtectionFaultPolicy};
use crate::error::{KILLED_STATUS, LoadError, ProcError};
use crate::loader;
use crate::ops::{Console, FileSystem, Scheduler};
use crate::pid_allocator::PidAllocator;
use crate::process::{ParentLink, Pid, Process, ProcessState};
use crate::registry::ProcessRegistry;
use crate::trap_frame::TrapFrame;

/// 创建第一个用户进程的内核上下文的 pid
pub const KERNEL_PID: Pid = 1;

lazy_static! {
    /// 文件系统全局锁：打开文件时持有
    static ref FILE_LOCK: SpinLock<()> = SpinLock::new(());
}

/// 父进程交给 fork 出的子进程的数据
struct ForkHandshake<PT: PageTableInner> {
    parent: Arc<Process<PT>>,
    frame: TrapFrame,
}

/// 进程管理器
pub struct ProcessManager<PT: PageTableInner> {
    config: ProcessConfig,
    scheduler: Arc<dyn Scheduler>,
    fs: Arc<dyn FileSystem>,
    console: Arc<dyn Console>,
    swap: Option<Arc<dyn SwapStore>>,
    registry: ProcessRegistry<PT>,
    pids: PidAllocator,
}

impl<PT: PageTableInner> ProcessManager<PT> {
    /// 创建进程管理器
    pub fn new(
        config: ProcessConfig,
        scheduler: Arc<dyn Scheduler>,
        fs: Arc<dyn FileSystem>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            config,
            scheduler,
            fs,
            console,
            swap: None,
            registry: ProcessRegistry::new(),
            pids: PidAllocator::new(),
        }
    }

    /// 为匿名页提供交换区；没有交换区时驻留页无法被换出
    pub fn with_swap(mut self, swap: Arc<dyn SwapStore>) -> Self {
        self.swap = Some(swap);
        self
    }

    /// 配置
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// 进程注册表
    pub fn registry(&self) -> &ProcessRegistry<PT> {
        &self.registry
    }

    /// 当前进程的 pid；内核上下文为 [`KERNEL_PID`]
    pub fn current_pid(&self) -> Pid {
        self.scheduler.current_pid().unwrap_or(KERNEL_PID)
    }

    /// 当前进程
    pub fn current(&self) -> Option<Arc<Process<PT>>> {
        self.registry.get(self.current_pid())
    }

    fn current_or_err(&self) -> Result<Arc<Process<PT>>, ProcError> {
        self.current().ok_or(ProcError::NoAddressSpace)
    }

    fn yield_now(&self) {
        self.scheduler.yield_now();
    }

    fn spawn(
        self: &Arc<Self>,
        process: Arc<Process<PT>>,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<(), ProcError> {
        let pid = process.pid();
        self.registry.insert(process.clone());
        if self.scheduler.spawn(pid, process.name(), entry) {
            Ok(())
        } else {
            self.registry.remove(pid);
            Err(ProcError::SpawnFailed)
        }
    }

    /// 创建第一个用户进程，在其中执行 `cmd_line`
    ///
    /// 进程以命令行的第一个词命名，父进程是调用者。返回新进程的 pid，
    /// 此时程序尚未装载；装载失败时该进程以 [`KILLED_STATUS`] 退出。
    pub fn create_initd(self: &Arc<Self>, cmd_line: &str) -> Result<Pid, ProcError> {
        let name = loader::program_name(cmd_line);
        let pid = self.pids.allocate();
        let process = Arc::new(Process::new(
            pid,
            name,
            ParentLink::Parent(self.current_pid()),
            self.config.max_fds,
        ));

        let manager = self.clone();
        let initd = process.clone();
        let cmd_line = String::from(cmd_line);
        let entry = Box::new(move || manager.initd_main(initd, &cmd_line));
        if let Err(err) = self.spawn(process, entry) {
            log::error!("create_initd: cannot spawn {}", name);
            return Err(err);
        }
        Ok(pid)
    }

    fn initd_main(&self, process: Arc<Process<PT>>, cmd_line: &str) {
        process.mark_user();
        let mut frame = TrapFrame::default();
        match self.exec_in(&process, cmd_line, &mut frame) {
            Ok(()) => self.run_user(&process, frame),
            Err(err) => {
                log::error!("initd: failed to launch {}: {:?}", cmd_line, err);
                self.exit_process(&process, KILLED_STATUS);
            }
        }
    }

    /// 在当前执行单元中运行用户程序直到它终止，然后退出进程
    fn run_user(&self, process: &Arc<Process<PT>>, frame: TrapFrame) {
        process.with_space(|space| space.activate());
        let status = self.scheduler.enter_user(frame);
        let status = if process.is_killed() {
            KILLED_STATUS
        } else {
            status
        };
        self.exit_process(process, status);
    }

    /// 复制当前进程，新进程名为 `name`
    ///
    /// `frame` 是父进程陷入时的用户上下文，子进程从它继续执行，但 `rax` 为 0。
    /// 返回前子进程已经完成（或放弃）复制。
    pub fn fork(self: &Arc<Self>, name: &str, frame: &TrapFrame) -> Result<Pid, ProcError> {
        let parent = self.current_or_err()?;
        let pid = self.pids.allocate();
        let child = Arc::new(Process::new(
            pid,
            name,
            ParentLink::Parent(parent.pid()),
            self.config.max_fds,
        ));

        let manager = self.clone();
        let forked = child.clone();
        let handshake = ForkHandshake {
            parent,
            frame: *frame,
        };
        self.spawn(child.clone(), Box::new(move || manager.fork_main(forked, handshake)))?;

        child.fork_done.down_with(|| self.yield_now());
        if child.parent() == ParentLink::Failed {
            // 子进程已在等 reap_permit，没有人会 wait 它
            child.reap_permit.up();
            return Err(ProcError::ForkFailed);
        }
        Ok(pid)
    }

    fn fork_main(&self, child: Arc<Process<PT>>, handshake: ForkHandshake<PT>) {
        let ForkHandshake { parent, mut frame } = handshake;
        let duplicated = parent
            .with_space(|space| space.duplicate())
            .unwrap_or(Err(PagingError::NotMapped));
        let space = match duplicated {
            Ok(space) => space,
            Err(err) => {
                log::warn!(
                    "fork: pid {}: cannot duplicate address space of pid {}: {:?}",
                    child.pid(),
                    parent.pid(),
                    err
                );
                *child.parent.lock() = ParentLink::Failed;
                drop(parent);
                child.fork_done.up();
                self.exit_process(&child, KILLED_STATUS);
                return;
            }
        };

        child.fds.copy_from(&parent.fds);
        *child.exe.lock() = parent.executable().map(|exe| exe.duplicate());
        *child.space.lock() = Some(space);
        if parent.is_user() {
            child.mark_user();
        }
        child.set_state(ProcessState::Running);
        drop(parent);

        frame.rax = 0;
        child.fork_done.up();
        self.run_user(&child, frame);
    }

    /// 在当前进程中执行 `cmd_line`
    ///
    /// 旧地址空间无论成败都会被销毁。成功时 `frame` 被改写为新程序的入口上下文；
    /// 失败时进程已没有地址空间，调用者必须让它终止。进程名保持不变。
    pub fn exec(&self, cmd_line: &str, frame: &mut TrapFrame) -> Result<(), ProcError> {
        let process = self.current_or_err()?;
        self.exec_in(&process, cmd_line, frame)
    }

    fn exec_in(
        &self,
        process: &Arc<Process<PT>>,
        cmd_line: &str,
        frame: &mut TrapFrame,
    ) -> Result<(), ProcError> {
        self.release_space(process);

        let name = loader::program_name(cmd_line);
        let exe = {
            let _guard = FILE_LOCK.lock();
            loader::open_executable(self.fs.as_ref(), name)?
        };
        exe.deny_write();
        *process.exe.lock() = Some(exe.clone());

        let (space, entry) = loader::load_image::<PT>(&self.config, self.swap.clone(), &exe, cmd_line)?;
        space.activate();
        *process.space.lock() = Some(space);
        process.set_state(ProcessState::Running);
        *frame = entry;
        Ok(())
    }

    /// 销毁进程的地址空间并关闭可执行文件
    ///
    /// 先从 PCB 上摘下地址空间，再切换到内核页表，最后才销毁它。
    fn release_space(&self, process: &Process<PT>) {
        let space = process.space.lock().take();
        if let Some(space) = space {
            AddressSpace::<PT>::deactivate();
            drop(space);
        }
        let exe = process.exe.lock().take();
        drop(exe);
    }

    /// 等待子进程 `pid` 退出并返回其退出状态
    ///
    /// `pid` 不是调用者的子进程，或已经被 wait 过时立即返回 [`ProcError::NotChild`]。
    pub fn wait(&self, pid: Pid) -> Result<i32, ProcError> {
        let caller = self.current_pid();
        let child = self.registry.get(pid).ok_or(ProcError::NotChild)?;
        {
            let mut parent = child.parent.lock();
            if *parent != ParentLink::Parent(caller) {
                return Err(ProcError::NotChild);
            }
            *parent = ParentLink::None;
        }

        child.exit_notify.down_with(|| self.yield_now());
        let status = child.exit_status();
        child.reap_permit.up();
        Ok(status)
    }

    /// 以 `status` 终止进程
    ///
    /// 返回时进程已被父进程回收（或被放行）并从注册表中移除。
    pub fn exit_process(&self, process: &Arc<Process<PT>>, status: i32) {
        process.set_exit_status(status);
        process.set_state(ProcessState::Exiting);
        if process.is_user() {
            self.console
                .write_str(&format!("{}: exit({})\n", process.name(), status));
        }

        drop(process.fds.take_all());
        for child in self.registry.children_of(process.pid()) {
            let mut parent = child.parent.lock();
            if *parent == ParentLink::Parent(process.pid()) {
                *parent = ParentLink::None;
                child.reap_permit.up();
            }
        }
        self.release_space(process);

        process.set_state(ProcessState::Zombie);
        process.exit_notify.up();
        process.reap_permit.down_with(|| self.yield_now());
        process.set_state(ProcessState::Reaped);
        self.registry.remove(process.pid());
    }

    /// 处理当前进程在 `addr` 处的缺页
    ///
    /// 无法解决的缺页会终止进程（返回 [`ProcError::Killed`]）；
    /// 若配置为 [`ProtectionFaultPolicy::Report`]，保护性缺页改为原样返回。
    pub fn handle_page_fault(&self, addr: usize, write: bool) -> Result<(), ProcError> {
        let process = self.current_or_err()?;
        let result = process.with_space(|space| space.handle_fault(Vaddr(addr), write));
        let err = match result {
            Some(Ok(())) => return Ok(()),
            Some(Err(FaultError::Protection))
                if self.config.protection_faults == ProtectionFaultPolicy::Report =>
            {
                return Err(ProcError::Fault(FaultError::Protection));
            }
            Some(Err(err)) => Some(err),
            None => None,
        };
        log::debug!(
            "pid {}: unresolved {} fault at {:#x}: {:?}",
            process.pid(),
            if write { "write" } else { "read" },
            addr,
            err
        );
        process.kill();
        Err(ProcError::Killed)
    }

    /// 把文件 `fd` 从 `offset` 起映射到 `addr`
    pub fn mmap(
        &self,
        addr: usize,
        length: usize,
        writable: bool,
        fd: usize,
        offset: usize,
    ) -> Result<usize, ProcError> {
        let process = self.current_or_err()?;
        let file = process.fds.get(fd)?;
        process
            .with_space(|space| space.mmap(Vaddr(addr), length, writable, &file, offset))
            .ok_or(ProcError::NoAddressSpace)?
            .map(|va| va.0)
            .map_err(ProcError::from)
    }

    /// 当前进程中是否有从 `addr` 开始的映射
    pub fn has_mapping(&self, addr: usize) -> bool {
        let Some(process) = self.current() else {
            return false;
        };
        let va = Vaddr(addr);
        va.is_page_aligned()
            && process
                .with_space(|space| {
                    space
                        .spt()
                        .is_some_and(|spt| spt.mapping(Vpn::from_addr_floor(va)).is_some())
                })
                .unwrap_or(false)
    }

    /// 解除当前进程中从 `addr` 开始的映射
    ///
    /// # Panics
    /// `addr` 不是一条现存映射的起始地址，见 [`ProcessManager::has_mapping`]
    pub fn munmap(&self, addr: usize) -> Result<(), ProcError> {
        let process = self.current_or_err()?;
        process
            .with_space(|space| space.munmap(Vaddr(addr)))
            .ok_or(ProcError::NoAddressSpace)
    }

    /// 打开文件并在当前进程中分配描述符
    pub fn open(&self, path: &str) -> Result<usize, ProcError> {
        let process = self.current_or_err()?;
        let inode = {
            let _guard = FILE_LOCK.lock();
            self.fs.open(path)
        };
        let inode = inode.ok_or(ProcError::Load(LoadError::OpenFailed))?;
        process.fds.alloc(OpenFile::new(inode))
    }

    /// 关闭当前进程的文件描述符
    pub fn close(&self, fd: usize) -> Result<(), ProcError> {
        self.current_or_err()?.fds.close(fd)
    }

    /// 当前进程的文件描述符对应的文件
    pub fn file(&self, fd: usize) -> Result<Arc<OpenFile>, ProcError> {
        self.current_or_err()?.fds.get(fd)
    }

    /// 当前进程是否已被内核判定终止
    pub fn is_killed(&self) -> bool {
        self.current().is_some_and(|process| process.is_killed())
    }

    /// 终止当前进程：它回到陷入处理层后应以 [`KILLED_STATUS`] 退出
    pub fn kill_current(&self) {
        if let Some(process) = self.current() {
            process.kill();
        }
    }
}
