mod common;

use common::*;
use process::{PagingMode, ProcessConfig};
use std::sync::atomic::Ordering;

fn config(paging: PagingMode) -> ProcessConfig {
    ProcessConfig {
        paging,
        ..ProcessConfig::default()
    }
}

#[test]
fn test_fork_return_values() {
    let h = Harness::new(ProcessConfig::default());
    let seen = recorder();

    let log = seen.clone();
    h.install_program("p", TEXT, move |user| {
        let pid = user.fork("c", TEXT + 0x10);
        let status = user.wait(pid);
        log.lock().unwrap().push(("parent", pid, status));
        Step::Exit(0)
    });
    let log = seen.clone();
    h.program(TEXT + 0x10, move |user| {
        log.lock().unwrap().push(("child", user.frame.rax as isize, user.pid() as isize));
        Step::Exit(1)
    });

    assert_eq!(h.run("p"), 0);
    let seen = seen.lock().unwrap();
    let (_, child_rax, child_pid) = seen[0];
    let (_, forked, status) = seen[1];
    assert_eq!(child_rax, 0);
    assert_eq!(forked, child_pid);
    assert_eq!(status, 1);
}

#[test]
fn test_child_memory_is_independent() {
    for paging in [PagingMode::Eager, PagingMode::Demand] {
        let h = Harness::new(config(paging));
        let seen = recorder();
        let data = DATA as usize;
        let bss = data + 0x1800;

        let log = seen.clone();
        h.install_program("p", TEXT, move |user| {
            user.store(bss, b"parent").unwrap();
            let pid = user.fork("c", TEXT + 0x10);
            user.wait(pid);
            log.lock().unwrap().push(user.load(bss, 6).unwrap());
            log.lock().unwrap().push(user.load(data, DATA_INIT.len()).unwrap());
            Step::Exit(0)
        });
        let log = seen.clone();
        h.program(TEXT + 0x10, move |user| {
            log.lock().unwrap().push(user.load(bss, 6).unwrap());
            user.store(bss, b"child!").unwrap();
            user.store(data, b"CHANGED").unwrap();
            Step::Exit(0)
        });

        assert_eq!(h.run("p"), 0, "{:?}", paging);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], b"parent");
        assert_eq!(seen[1], b"parent");
        assert_eq!(seen[2], DATA_INIT);
    }
}

#[test]
fn test_child_inherits_argument_stack() {
    let h = Harness::new(config(PagingMode::Eager));
    let seen = recorder();
    let log = seen.clone();
    h.install_program("p", TEXT, |user| {
        let pid = user.fork("c", TEXT + 0x10);
        Step::Exit(user.wait(pid) as i32)
    });
    h.program(TEXT + 0x10, move |user| {
        log.lock().unwrap().push(user.args().unwrap());
        Step::Exit(0)
    });

    assert_eq!(h.run("p one two"), 0);
    assert_eq!(seen.lock().unwrap()[0], ["p", "one", "two"]);
}

#[test]
fn test_descriptors_are_duplicated() {
    let h = Harness::new(ProcessConfig::default());
    let seen = recorder();
    h.install("file", b"0123456789".to_vec());

    let log = seen.clone();
    h.install_program("p", TEXT, move |user| {
        let fd = user.open("file").unwrap();
        let mut buf = [0u8; 2];
        user.manager().file(fd).unwrap().read(&mut buf).unwrap();
        let pid = user.fork("c", TEXT + 0x10);
        user.wait(pid);
        let file = user.manager().file(fd).unwrap();
        log.lock().unwrap().push(file.tell());
        Step::Exit(0)
    });
    let log = seen.clone();
    h.program(TEXT + 0x10, move |user| {
        let file = user.manager().file(2).unwrap();
        log.lock().unwrap().push(file.tell());
        let mut buf = [0u8; 5];
        file.read(&mut buf).unwrap();
        user.close(2);
        Step::Exit(0)
    });

    assert_eq!(h.run("p"), 0);
    // 子进程看到同样的游标，但它的读和关闭都不影响父进程
    assert_eq!(*seen.lock().unwrap(), [2, 2]);
}

#[test]
fn test_forked_process_prints_exit_message() {
    let h = Harness::new(ProcessConfig::default());
    h.install_program("p", TEXT, |user| {
        let pid = user.fork("kid", TEXT + 0x10);
        user.wait(pid);
        Step::Exit(0)
    });
    h.program(TEXT + 0x10, |_| Step::Exit(2));

    assert_eq!(h.run("p"), 0);
    assert_eq!(h.output(), "kid: exit(2)\np: exit(0)\n");
}

#[test]
fn test_fork_fails_when_spawn_refused() {
    let h = Harness::new(ProcessConfig::default());
    let seen = recorder();
    let log = seen.clone();
    let scheduler = h.scheduler.clone();
    h.install_program("p", TEXT, move |user| {
        scheduler.refuse_spawn.store(true, Ordering::SeqCst);
        log.lock().unwrap().push(user.fork("c", TEXT + 0x10));
        Step::Exit(0)
    });

    assert_eq!(h.run("p"), 0);
    assert_eq!(*seen.lock().unwrap(), [-1]);
    assert!(h.manager.registry().is_empty());
}

#[test]
fn test_unloaded_pages_load_independently_in_child() {
    let h = Harness::new(config(PagingMode::Demand));
    let seen = recorder();
    let data = DATA as usize;

    let log = seen.clone();
    h.install_program("p", TEXT, move |user| {
        // 数据段尚未被访问过：父子进程各自从文件装入
        let pid = user.fork("c", TEXT + 0x10);
        user.wait(pid);
        log.lock().unwrap().push(user.load(data, DATA_INIT.len()).unwrap());
        Step::Exit(0)
    });
    let log = seen.clone();
    h.program(TEXT + 0x10, move |user| {
        log.lock().unwrap().push(user.load(data, DATA_INIT.len()).unwrap());
        user.store(data, b"X").unwrap();
        Step::Exit(0)
    });

    assert_eq!(h.run("p"), 0);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], DATA_INIT);
    assert_eq!(seen[1], DATA_INIT);
}
