//! SVC syscall dispatch.
//!
//! The trap instruction carries the syscall number; arguments travel in a
//! fixed register array and the return value is written back into
//! `args[0]`. Handlers either complete synchronously or block the caller
//! on a wait queue and request a deferred reschedule; a blocked call's
//! real return value is delivered through the TCB return slot when the
//! thread is woken.
//!
//! Unknown or configuration-disabled numbers land in the `nosys` stub.
//! Reserved slots for subsystems that live outside the kernel core
//! (console, IRQ wait) stay wired to `nosys` as well, so an unconfigured
//! combination reports a configuration error instead of guessing.

use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, SvcAction};
use crate::thread::ThreadId;

/// Fixed-register argument array. Slot 0 doubles as the return slot.
pub type SyscallArgs = [usize; 6];

pub const THREAD_SELF: u32 = 0;
pub const THREAD_CREATE: u32 = 1;

pub const CLOCK: u32 = 2;
pub const ALARM: u32 = 3;
pub const SLEEP: u32 = 4;

pub const MUTEX_LOCK: u32 = 5;
pub const MUTEX_TRYLOCK: u32 = 6;
pub const MUTEX_TIMEDLOCK: u32 = 7;
pub const MUTEX_UNLOCK: u32 = 8;

pub const SEM_INIT: u32 = 9;
pub const SEM_WAIT: u32 = 10;
pub const SEM_TRYWAIT: u32 = 11;
pub const SEM_TIMEDWAIT: u32 = 12;
pub const SEM_POST: u32 = 13;

pub const COND_WAIT: u32 = 14;
pub const COND_TIMEDWAIT: u32 = 15;
pub const COND_SIGNAL: u32 = 16;
pub const COND_BROADCAST: u32 = 17;

pub const FLAG_TAKE: u32 = 18;
pub const FLAG_TIMEDTAKE: u32 = 19;
pub const FLAG_GIVE: u32 = 20;
pub const FLAG_VAL: u32 = 21;
pub const FLAG_CLR: u32 = 22;
pub const FLAG_SET: u32 = 23;
pub const FLAG_WATCH: u32 = 24;
pub const FLAG_TIMEDWATCH: u32 = 25;

pub const GATE_WAIT: u32 = 26;
pub const GATE_TIMEDWAIT: u32 = 27;
pub const GATE_EXIT: u32 = 28;
pub const GATE_OPEN: u32 = 29;
pub const GATE_CLOSE: u32 = 30;

pub const EVENT_WAIT: u32 = 31;
pub const EVENT_TIMEDWAIT: u32 = 32;
pub const EVENT_RAISE: u32 = 33;
pub const EVENT_MASK: u32 = 34;
pub const EVENT_CLEAR: u32 = 35;
pub const EVENT_WAITALL: u32 = 36;

pub const MUTEX_ALLOC: u32 = 40;
pub const MUTEX_FREE: u32 = 41;
pub const SEM_ALLOC: u32 = 42;
pub const SEM_FREE: u32 = 43;
pub const COND_ALLOC: u32 = 44;
pub const COND_FREE: u32 = 45;
pub const FLAG_ALLOC: u32 = 46;
pub const FLAG_FREE: u32 = 47;
pub const EVENT_ALLOC: u32 = 48;
pub const EVENT_FREE: u32 = 49;
pub const GATE_ALLOC: u32 = 50;
pub const GATE_FREE: u32 = 51;

pub const JOIN: u32 = 52;
pub const PAUSE: u32 = 53;
pub const RESUME: u32 = 54;
pub const CANCEL: u32 = 55;
pub const EXIT: u32 = 56;
pub const TERMINATE: u32 = 57;

pub const CTL: u32 = 58;

pub const SYSCALL_MAX: usize = 64;

/// `ctl` sub-commands: read-only profile queries for host tooling.
pub const CTL_VERSION: usize = 0;
pub const CTL_THREAD_MAX: usize = 1;
pub const CTL_CLOCK: usize = 2;

pub type SvcHandler = fn(&Kernel, &mut SyscallArgs, ThreadId);

/// Thread creation descriptor passed by pointer in `args[0]`.
#[repr(C)]
pub struct ThreadInit {
    pub stack_ptr: *mut u8,
    pub stack_size: usize,
    pub entry: fn(),
    pub priority: u8,
}

pub fn svc_dispatch(krn: &Kernel, nr: u32, args: &mut SyscallArgs, self_id: ThreadId) {
    let handler = TABLE
        .get(nr as usize)
        .copied()
        .unwrap_or(svc_nosys as SvcHandler);
    handler(krn, args, self_id);
}

/// Write an operation outcome into the return slot. A blocked call gets
/// the default return value armed at block time; the wakeup path
/// overwrites it in the TCB before the thread resumes.
fn put(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId, res: KernelResult<SvcAction>) {
    args[0] = match res {
        Ok(SvcAction::Ret(v)) => v as isize as usize,
        Ok(SvcAction::Block) => krn.thread_svc_ret(self_id).unwrap_or(0) as isize as usize,
        Err(e) => e.code() as isize as usize,
    };
}

fn put_handle(args: &mut SyscallArgs, res: KernelResult<u32>) {
    args[0] = match res {
        Ok(h) => h as usize,
        Err(e) => e.code() as isize as usize,
    };
}

fn put_unit(args: &mut SyscallArgs, res: KernelResult<()>) {
    args[0] = match res {
        Ok(()) => 0,
        Err(e) => e.code() as isize as usize,
    };
}

fn svc_nosys(_krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    log::warn!("thread {} invoked an unimplemented syscall", self_id);
    args[0] = KernelError::NoSys.code() as isize as usize;
}

fn svc_thread_self(_krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    args[0] = self_id;
}

fn svc_thread_create(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    let init = args[0] as *const ThreadInit;
    #[cfg(feature = "arg-check")]
    if init.is_null() {
        args[0] = KernelError::InvalidArgument.code() as isize as usize;
        return;
    }
    let init = unsafe { &*init };
    let stack = unsafe { core::slice::from_raw_parts_mut(init.stack_ptr, init.stack_size) };
    put_handle(
        args,
        krn.thread_create(stack, init.entry, init.priority)
            .map(|t| t as u32),
    );
}

fn svc_clock(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    args[0] = krn.clock() as usize;
}

fn svc_alarm(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let deadline = args[0] as u32;
    put(krn, args, self_id, krn.alarm(self_id, deadline));
}

fn svc_sleep(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let ms = args[0] as u32;
    put(krn, args, self_id, krn.sleep(self_id, ms));
}

fn svc_mutex_lock(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.mutex_lock(args[0] as u32, self_id));
}

fn svc_mutex_trylock(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.mutex_trylock(args[0] as u32, self_id));
}

fn svc_mutex_timedlock(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.mutex_timedlock(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_mutex_unlock(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.mutex_unlock(args[0] as u32, self_id));
}

fn svc_sem_init(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.sem_init(args[0] as u32, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_sem_wait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.sem_wait(args[0] as u32, self_id));
}

fn svc_sem_trywait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.sem_trywait(args[0] as u32, self_id));
}

fn svc_sem_timedwait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.sem_timedwait(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_sem_post(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.sem_post(args[0] as u32));
}

fn svc_cond_wait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.cond_wait(args[0] as u32, args[1] as u32, self_id);
    put(krn, args, self_id, res);
}

fn svc_cond_timedwait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.cond_timedwait(args[0] as u32, args[1] as u32, self_id, args[2] as u32);
    put(krn, args, self_id, res);
}

fn svc_cond_signal(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.cond_signal(args[0] as u32));
}

fn svc_cond_broadcast(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.cond_broadcast(args[0] as u32));
}

fn svc_flag_take(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_take(args[0] as u32, self_id));
}

fn svc_flag_timedtake(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.flag_timedtake(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_flag_give(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_give(args[0] as u32));
}

fn svc_flag_val(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_val(args[0] as u32));
}

fn svc_flag_clr(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_clr(args[0] as u32));
}

fn svc_flag_set(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_set(args[0] as u32));
}

fn svc_flag_watch(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.flag_watch(args[0] as u32, self_id));
}

fn svc_flag_timedwatch(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.flag_timedwatch(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_gate_wait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.gate_wait(args[0] as u32, self_id));
}

fn svc_gate_timedwait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.gate_timedwait(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_gate_exit(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.gate_exit(args[0] as u32, args[1] as u32, self_id);
    put(krn, args, self_id, res);
}

fn svc_gate_open(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.gate_open(args[0] as u32));
}

fn svc_gate_close(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.gate_close(args[0] as u32));
}

fn svc_ev_wait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.ev_wait(args[0] as u32, self_id));
}

fn svc_ev_timedwait(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.ev_timedwait(args[0] as u32, self_id, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_ev_waitall(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.ev_wait_all(args[0] as u32, args[1] as u32, self_id);
    put(krn, args, self_id, res);
}

fn svc_ev_raise(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.ev_raise(args[0] as u32, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_ev_mask(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.ev_mask(args[0] as u32, args[1] as u32, args[2] as u32);
    put(krn, args, self_id, res);
}

fn svc_ev_clear(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.ev_clear(args[0] as u32, args[1] as u32);
    put(krn, args, self_id, res);
}

fn svc_mutex_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.mutex_alloc());
}

fn svc_mutex_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.mutex_free(args[0] as u32));
}

fn svc_sem_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.sem_alloc(args[0] as u32));
}

fn svc_sem_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.sem_free(args[0] as u32));
}

fn svc_cond_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.cond_alloc());
}

fn svc_cond_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.cond_free(args[0] as u32));
}

fn svc_flag_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.flag_alloc());
}

fn svc_flag_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.flag_free(args[0] as u32));
}

fn svc_ev_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.ev_alloc());
}

fn svc_ev_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.ev_free(args[0] as u32));
}

fn svc_gate_alloc(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_handle(args, krn.gate_alloc());
}

fn svc_gate_free(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    put_unit(args, krn.gate_free(args[0] as u32));
}

fn svc_join(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    put(krn, args, self_id, krn.join(args[0], self_id));
}

fn svc_pause(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let _ = self_id;
    put_unit(args, krn.thread_pause(args[0]));
}

fn svc_resume(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let _ = self_id;
    put_unit(args, krn.thread_resume(args[0]));
}

fn svc_cancel(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let _ = self_id;
    put_unit(args, krn.cancel(args[0]));
}

fn svc_exit(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let code = args[0] as i32;
    let _ = krn.thread_exit(self_id, code);
    args[0] = 0;
}

fn svc_terminate(krn: &Kernel, args: &mut SyscallArgs, self_id: ThreadId) {
    let res = krn.thread_terminate(args[0], args[1] as i32);
    put(krn, args, self_id, res);
}

fn svc_ctl(krn: &Kernel, args: &mut SyscallArgs, _self_id: ThreadId) {
    let profile = krn.profile();
    match args[0] {
        CTL_VERSION => {
            args[0] = ((profile.version.0 as usize) << 8) | profile.version.1 as usize;
        }
        CTL_THREAD_MAX => args[0] = profile.threads_max,
        CTL_CLOCK => args[0] = krn.clock() as usize,
        _ => args[0] = KernelError::InvalidArgument.code() as isize as usize,
    }
}

static TABLE: [SvcHandler; SYSCALL_MAX] = [
    svc_thread_self,    // 0
    svc_thread_create,  // 1
    svc_clock,          // 2
    svc_alarm,          // 3
    svc_sleep,          // 4
    svc_mutex_lock,     // 5
    svc_mutex_trylock,  // 6
    svc_mutex_timedlock, // 7
    svc_mutex_unlock,   // 8
    svc_sem_init,       // 9
    svc_sem_wait,       // 10
    svc_sem_trywait,    // 11
    svc_sem_timedwait,  // 12
    svc_sem_post,       // 13
    svc_cond_wait,      // 14
    svc_cond_timedwait, // 15
    svc_cond_signal,    // 16
    svc_cond_broadcast, // 17
    svc_flag_take,      // 18
    svc_flag_timedtake, // 19
    svc_flag_give,      // 20
    svc_flag_val,       // 21
    svc_flag_clr,       // 22
    svc_flag_set,       // 23
    svc_flag_watch,     // 24
    svc_flag_timedwatch, // 25
    svc_gate_wait,      // 26
    svc_gate_timedwait, // 27
    svc_gate_exit,      // 28
    svc_gate_open,      // 29
    svc_gate_close,     // 30
    svc_ev_wait,        // 31
    svc_ev_timedwait,   // 32
    svc_ev_raise,       // 33
    svc_ev_mask,        // 34
    svc_ev_clear,       // 35
    svc_ev_waitall,     // 36
    svc_nosys,          // 37 irq wait, external
    svc_nosys,          // 38 irq timedwait, external
    svc_nosys,          // 39 irq ctl, external
    svc_mutex_alloc,    // 40
    svc_mutex_free,     // 41
    svc_sem_alloc,      // 42
    svc_sem_free,       // 43
    svc_cond_alloc,     // 44
    svc_cond_free,      // 45
    svc_flag_alloc,     // 46
    svc_flag_free,      // 47
    svc_ev_alloc,       // 48
    svc_ev_free,        // 49
    svc_gate_alloc,     // 50
    svc_gate_free,      // 51
    svc_join,           // 52
    svc_pause,          // 53
    svc_resume,         // 54
    svc_cancel,         // 55
    svc_exit,           // 56
    svc_terminate,      // 57
    svc_ctl,            // 58
    svc_nosys,          // 59 comm, external
    svc_nosys,          // 60
    svc_nosys,          // 61
    svc_nosys,          // 62
    svc_nosys,          // 63
];
