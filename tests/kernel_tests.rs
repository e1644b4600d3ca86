//! Syscall dispatch and scheduler scenario tests.

use thinkos_kernel::config::{IDLE_ID, THREAD_MAX};
use thinkos_kernel::syscall::{
    self, svc_dispatch, SyscallArgs, ThreadInit, CTL_CLOCK, CTL_THREAD_MAX, CTL_VERSION,
};
use thinkos_kernel::{Kernel, KernelError, ThreadState};

fn stack() -> &'static mut [u8] {
    Box::leak(vec![0u8; 1024].into_boxed_slice())
}

fn kernel() -> Kernel {
    let k = Kernel::new();
    k.start();
    k
}

fn noop() {}

fn svc(k: &Kernel, nr: u32, args: &mut SyscallArgs, self_id: usize) -> i32 {
    svc_dispatch(k, nr, args, self_id);
    args[0] as i32
}

#[test]
fn lowest_id_ready_thread_always_runs() {
    let k = kernel();
    let t1 = k.thread_create(stack(), noop, 0).unwrap();
    let t2 = k.thread_create(stack(), noop, 1).unwrap();
    let t3 = k.thread_create(stack(), noop, 2).unwrap();
    assert_eq!((t1, t2, t3), (0, 1, 2));

    // all ready: the lowest id wins, repeatedly
    for _ in 0..3 {
        assert_eq!(k.schedule(), t1);
    }

    k.suspend(t1);
    assert_eq!(k.schedule(), t2);
    k.resume(t1);
    assert_eq!(k.schedule(), t1);

    k.suspend(t1);
    k.suspend(t2);
    k.suspend(t3);
    assert_eq!(k.schedule(), IDLE_ID);
}

#[test]
fn thread_self_reports_active_thread() {
    let k = kernel();
    let t0 = k.thread_create(stack(), noop, 0).unwrap();
    k.schedule();
    let mut args: SyscallArgs = [0; 6];
    assert_eq!(svc(&k, syscall::THREAD_SELF, &mut args, t0), t0 as i32);
}

#[test]
fn thread_create_via_trap() {
    let k = kernel();
    let st = stack();
    let init = ThreadInit {
        stack_ptr: st.as_mut_ptr(),
        stack_size: st.len(),
        entry: noop,
        priority: 4,
    };
    let mut args: SyscallArgs = [&init as *const ThreadInit as usize, 0, 0, 0, 0, 0];
    let t = svc(&k, syscall::THREAD_CREATE, &mut args, 0);
    assert_eq!(t, 0);
    assert_eq!(k.thread_state(0), Some(ThreadState::Ready));
}

#[test]
fn unknown_syscall_reports_configuration_error() {
    let k = kernel();
    let mut args: SyscallArgs = [0; 6];
    assert_eq!(svc(&k, 63, &mut args, 0), KernelError::NoSys.code());
    // out-of-table numbers land in the same stub
    let mut args: SyscallArgs = [0; 6];
    assert_eq!(svc(&k, 200, &mut args, 0), KernelError::NoSys.code());
    // reserved slots for externally-provided subsystems too
    let mut args: SyscallArgs = [0; 6];
    assert_eq!(svc(&k, 37, &mut args, 0), KernelError::NoSys.code());
}

#[test]
fn mutex_round_trip_through_dispatcher() {
    let k = kernel();
    let t0 = k.thread_create(stack(), noop, 0).unwrap();
    let t1 = k.thread_create(stack(), noop, 1).unwrap();

    let mut args: SyscallArgs = [0; 6];
    let m = svc(&k, syscall::MUTEX_ALLOC, &mut args, t0);
    assert!(m >= 0);

    let mut args: SyscallArgs = [m as usize, 0, 0, 0, 0, 0];
    assert_eq!(svc(&k, syscall::MUTEX_LOCK, &mut args, t0), 0);

    // contender blocks; its return slot holds the armed default
    let mut args: SyscallArgs = [m as usize, 0, 0, 0, 0, 0];
    svc(&k, syscall::MUTEX_LOCK, &mut args, t1);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Blocked));

    let mut args: SyscallArgs = [m as usize, 0, 0, 0, 0, 0];
    assert_eq!(svc(&k, syscall::MUTEX_UNLOCK, &mut args, t0), 0);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t1), Some(0));
    assert_eq!(k.mutex_owner(m as u32).unwrap(), Some(t1));

    let mut args: SyscallArgs = [m as usize, 0, 0, 0, 0, 0];
    assert_eq!(
        svc(&k, syscall::MUTEX_UNLOCK, &mut args, t0),
        KernelError::Permission.code()
    );
}

#[test]
fn sleep_and_tick_through_dispatcher() {
    let k = kernel();
    let t0 = k.thread_create(stack(), noop, 0).unwrap();

    let mut args: SyscallArgs = [2, 0, 0, 0, 0, 0];
    svc(&k, syscall::SLEEP, &mut args, t0);
    assert_eq!(k.thread_state(t0), Some(ThreadState::Blocked));

    k.on_tick();
    k.on_tick();
    assert_eq!(k.thread_state(t0), Some(ThreadState::Ready));

    let mut args: SyscallArgs = [0; 6];
    assert_eq!(svc(&k, syscall::CLOCK, &mut args, t0), 2);
}

#[test]
fn exit_and_join_through_dispatcher() {
    let k = kernel();
    let worker = k.thread_create(stack(), noop, 0).unwrap();
    let joiner = k.thread_create(stack(), noop, 1).unwrap();

    let mut args: SyscallArgs = [worker, 0, 0, 0, 0, 0];
    svc(&k, syscall::JOIN, &mut args, joiner);
    assert_eq!(k.thread_state(joiner), Some(ThreadState::Blocked));

    let mut args: SyscallArgs = [55, 0, 0, 0, 0, 0];
    svc(&k, syscall::EXIT, &mut args, worker);
    assert_eq!(k.thread_state(joiner), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(joiner), Some(55));
}

#[test]
fn cancel_through_dispatcher_marks_outcome() {
    let k = kernel();
    let t0 = k.thread_create(stack(), noop, 0).unwrap();
    let t1 = k.thread_create(stack(), noop, 1).unwrap();

    let mut args: SyscallArgs = [1000, 0, 0, 0, 0, 0];
    svc(&k, syscall::SLEEP, &mut args, t1);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Blocked));

    let mut args: SyscallArgs = [t1, 0, 0, 0, 0, 0];
    assert_eq!(svc(&k, syscall::CANCEL, &mut args, t0), 0);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t1), Some(KernelError::Interrupted.code()));
}

#[test]
fn event_waitall_through_dispatcher() {
    let k = kernel();
    let t0 = k.thread_create(stack(), noop, 0).unwrap();
    let t1 = k.thread_create(stack(), noop, 1).unwrap();

    let mut args: SyscallArgs = [0; 6];
    let e = svc(&k, syscall::EVENT_ALLOC, &mut args, t0);
    assert!(e >= 0);

    let want = (1 << 0) | (1 << 3);
    let mut args: SyscallArgs = [e as usize, want, 0, 0, 0, 0];
    svc(&k, syscall::EVENT_WAITALL, &mut args, t1);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Blocked));

    let mut args: SyscallArgs = [e as usize, 0, 0, 0, 0, 0];
    svc(&k, syscall::EVENT_RAISE, &mut args, t0);
    let mut args: SyscallArgs = [e as usize, 3, 0, 0, 0, 0];
    svc(&k, syscall::EVENT_RAISE, &mut args, t0);
    assert_eq!(k.thread_state(t1), Some(ThreadState::Ready));
}

#[test]
fn ctl_exposes_the_profile() {
    let k = kernel();
    let mut args: SyscallArgs = [CTL_VERSION, 0, 0, 0, 0, 0];
    svc_dispatch(&k, syscall::CTL, &mut args, 0);
    let profile = k.profile();
    assert_eq!(
        args[0],
        ((profile.version.0 as usize) << 8) | profile.version.1 as usize
    );

    let mut args: SyscallArgs = [CTL_THREAD_MAX, 0, 0, 0, 0, 0];
    svc_dispatch(&k, syscall::CTL, &mut args, 0);
    assert_eq!(args[0], THREAD_MAX);

    k.on_tick();
    let mut args: SyscallArgs = [CTL_CLOCK, 0, 0, 0, 0, 0];
    svc_dispatch(&k, syscall::CTL, &mut args, 0);
    assert_eq!(args[0], 1);
}

#[test]
fn profile_reflects_compiled_pools() {
    let k = kernel();
    let p = k.profile();
    assert_eq!(p.threads_max, THREAD_MAX);
    assert!(p.mutex_max > 0);
    assert!(p.bp_max > 0);
    #[cfg(feature = "arg-check")]
    assert!(p
        .flags
        .contains(thinkos_kernel::config::ProfileFlags::ARG_CHECK));
}
