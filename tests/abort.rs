//! a non-failing frame aborts the process instead of unwinding, so every
//! case runs in a child process of this test binary

use std::env;
use std::process::{Command, ExitStatus, Stdio};

use futures::executor::block_on;
use lazy_coro::{Gn, Scope, Task, Terminate};

const CASE: &str = "LAZY_CORO_ABORT_CASE";

/// run `body` in a child process and check that it aborted
///
/// inside the child `body` runs directly, if it returns the child exits
/// successfully and the parent assertion fails
fn expect_abort(case: &str, body: impl FnOnce()) {
    if env::var(CASE).as_deref() == Ok(case) {
        body();
        return;
    }

    let exe = env::current_exe().unwrap();
    let status = Command::new(exe)
        .args([case, "--exact", "--test-threads=1", "--nocapture"])
        .env(CASE, case)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_aborted(case, status);
}

#[cfg(unix)]
fn assert_aborted(case: &str, status: ExitStatus) {
    use std::os::unix::process::ExitStatusExt;
    // SIGABRT
    assert_eq!(status.signal(), Some(6), "{case}: {status:?}");
}

#[cfg(not(unix))]
fn assert_aborted(case: &str, status: ExitStatus) {
    // 101 is the exit code of an unwinding test failure
    assert!(!status.success(), "{case}: {status:?}");
    assert_ne!(status.code(), Some(101), "{case}: {status:?}");
}

#[test]
fn nothrow_empty_task_aborts() {
    expect_abort("nothrow_empty_task_aborts", || {
        let task: Task<u32, Terminate> = Task::empty();
        block_on(task);
    });
}

#[test]
fn nothrow_task_body_panic_aborts() {
    expect_abort("nothrow_task_body_panic_aborts", || {
        let task: Task<(), Terminate> = Task::nothrow(async {
            panic!("task body");
        });
        block_on(task);
    });
}

#[test]
fn nothrow_generator_panic_aborts() {
    expect_abort("nothrow_generator_panic_aborts", || {
        let mut g = Gn::nothrow_scoped(|mut s: Scope<u8>| async move {
            s.yield_(1).await;
            panic!("generator body");
        });
        assert_eq!(g.next(), Some(1));
        g.next();
    });
}

#[test]
fn nothrow_recursive_nested_panic_aborts() {
    expect_abort("nothrow_recursive_nested_panic_aborts", || {
        let g = Gn::nothrow_recursive(|mut s| async move {
            let nested = Gn::nothrow_recursive(|_s| async move {
                panic!("nested body");
            });
            s.yield_from(nested).await;
            s.yield_(1u8).await;
        });
        let _ = g.count();
    });
}

#[test]
fn propagate_task_failure_does_not_abort() {
    // the same failure under the default policy unwinds in the child
    let case = "propagate_task_failure_does_not_abort";
    if env::var(CASE).as_deref() == Ok(case) {
        let task: Task<()> = Task::new(async {
            panic!("task body");
        });
        block_on(task);
        return;
    }

    let status = Command::new(env::current_exe().unwrap())
        .args([case, "--exact", "--test-threads=1"])
        .env(CASE, case)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(101), "{case}: {status:?}");
}
