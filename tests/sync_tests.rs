//! Synchronization object behavior tests.

use thinkos_kernel::config::{EVENT_MAX, MUTEX_MAX};
use thinkos_kernel::{Kernel, KernelError, SvcAction, ThreadState};

fn stack() -> &'static mut [u8] {
    Box::leak(vec![0u8; 1024].into_boxed_slice())
}

fn kernel() -> Kernel {
    let k = Kernel::new();
    k.start();
    k
}

fn noop() {}

fn spawn(k: &Kernel, n: usize) -> Vec<usize> {
    (0..n)
        .map(|i| k.thread_create(stack(), noop, i as u8).unwrap())
        .collect()
}

// ----------------------------------------------------------------------
// Mutex
// ----------------------------------------------------------------------

#[test]
fn mutex_has_at_most_one_owner() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();

    assert_eq!(k.mutex_lock(m, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[0]));

    assert_eq!(k.mutex_lock(m, t[1]), Ok(SvcAction::Block));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[0]));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));
}

#[test]
fn mutex_unlock_by_non_owner_fails() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    assert_eq!(k.mutex_unlock(m, t[1]), Err(KernelError::Permission));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[0]));
}

#[test]
fn mutex_relock_by_owner_is_deadlock_not_crash() {
    let k = kernel();
    let t = spawn(&k, 1);
    let m = k.mutex_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    assert_eq!(k.mutex_lock(m, t[0]), Err(KernelError::Deadlock));
    // idempotent failure: the thread stays runnable and keeps the lock
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[0]));
    assert_eq!(k.mutex_lock(m, t[0]), Err(KernelError::Deadlock));
}

#[test]
fn mutex_unlock_transfers_to_earliest_waiter() {
    let k = kernel();
    let t = spawn(&k, 3);
    let m = k.mutex_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    k.mutex_lock(m, t[1]).unwrap();
    k.mutex_lock(m, t[2]).unwrap();

    k.mutex_unlock(m, t[0]).unwrap();
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[1]));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[1]), Some(0));
    assert_eq!(k.thread_state(t[2]), Some(ThreadState::Blocked));

    k.mutex_unlock(m, t[1]).unwrap();
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[2]));

    k.mutex_unlock(m, t[2]).unwrap();
    assert_eq!(k.mutex_owner(m).unwrap(), None);
}

#[test]
fn mutex_trylock_does_not_block() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();

    assert_eq!(k.mutex_trylock(m, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.mutex_trylock(m, t[1]), Err(KernelError::Again));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.mutex_trylock(m, t[0]), Err(KernelError::Deadlock));
}

#[test]
fn mutex_timedlock_expires() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    assert_eq!(k.mutex_timedlock(m, t[1], 3), Ok(SvcAction::Block));

    for _ in 0..4 {
        k.on_tick();
    }
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[1]), Some(KernelError::TimedOut.code()));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[0]));

    // the expired waiter left the queue, so unlock releases outright
    k.mutex_unlock(m, t[0]).unwrap();
    assert_eq!(k.mutex_owner(m).unwrap(), None);
}

#[test]
fn mutex_pool_exhaustion_and_refill() {
    let k = kernel();
    let mut handles = Vec::new();
    for _ in 0..MUTEX_MAX {
        handles.push(k.mutex_alloc().unwrap());
    }
    assert_eq!(k.mutex_alloc(), Err(KernelError::NoMemory));

    k.mutex_free(handles[3]).unwrap();
    // exactly one more allocation succeeds
    assert_eq!(k.mutex_alloc().unwrap(), handles[3]);
    assert_eq!(k.mutex_alloc(), Err(KernelError::NoMemory));
}

#[test]
fn mutex_free_with_waiters_is_refused() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    k.mutex_lock(m, t[1]).unwrap();

    assert_eq!(k.mutex_free(m), Err(KernelError::Permission));
    // the object survives and the waiter is still queued
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));
    k.mutex_unlock(m, t[0]).unwrap();
    assert_eq!(k.mutex_owner(m).unwrap(), Some(t[1]));
}

// ----------------------------------------------------------------------
// Semaphore
// ----------------------------------------------------------------------

#[test]
fn sem_wait_decrements_and_blocks_at_zero() {
    let k = kernel();
    let t = spawn(&k, 3);
    let s = k.sem_alloc(2).unwrap();

    assert_eq!(k.sem_wait(s, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.sem_wait(s, t[1]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.sem_value(s).unwrap(), 0);

    assert_eq!(k.sem_wait(s, t[2]), Ok(SvcAction::Block));
    assert_eq!(k.sem_value(s).unwrap(), 0);
}

#[test]
fn sem_post_with_waiters_wakes_exactly_one() {
    let k = kernel();
    let t = spawn(&k, 2);
    let s = k.sem_alloc(0).unwrap();

    k.sem_wait(s, t[0]).unwrap();
    k.sem_wait(s, t[1]).unwrap();

    k.sem_post(s).unwrap();
    // count unchanged, one thread (the earliest) released
    assert_eq!(k.sem_value(s).unwrap(), 0);
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));
}

#[test]
fn sem_post_without_waiters_increments_by_one() {
    let k = kernel();
    let s = k.sem_alloc(0).unwrap();
    k.sem_post(s).unwrap();
    assert_eq!(k.sem_value(s).unwrap(), 1);
    k.sem_post(s).unwrap();
    assert_eq!(k.sem_value(s).unwrap(), 2);
}

#[test]
fn sem_trywait_fails_at_zero() {
    let k = kernel();
    let t = spawn(&k, 1);
    let s = k.sem_alloc(1).unwrap();

    assert_eq!(k.sem_trywait(s, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.sem_trywait(s, t[0]), Err(KernelError::Again));
    assert_eq!(k.sem_value(s).unwrap(), 0);
}

#[test]
fn sem_timedwait_expiry_is_independent_of_post() {
    let k = kernel();
    let t = spawn(&k, 2);
    let s = k.sem_alloc(0).unwrap();

    k.sem_timedwait(s, t[0], 2).unwrap();
    k.sem_timedwait(s, t[1], 100).unwrap();

    for _ in 0..3 {
        k.on_tick();
    }
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[0]), Some(KernelError::TimedOut.code()));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));

    // a post after expiry reaches the surviving waiter, not the expired one
    k.sem_post(s).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[1]), Some(0));
    assert_eq!(k.sem_value(s).unwrap(), 0);
}

// ----------------------------------------------------------------------
// Condvar
// ----------------------------------------------------------------------

#[test]
fn cond_wait_requires_mutex_ownership() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();
    let c = k.cond_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    assert_eq!(k.cond_wait(c, m, t[1]), Err(KernelError::Permission));
}

#[test]
fn cond_wait_releases_the_mutex() {
    let k = kernel();
    let t = spawn(&k, 2);
    let m = k.mutex_alloc().unwrap();
    let c = k.cond_alloc().unwrap();

    k.mutex_lock(m, t[0]).unwrap();
    assert_eq!(k.cond_wait(c, m, t[0]), Ok(SvcAction::Block));
    assert_eq!(k.mutex_owner(m).unwrap(), None);

    // another thread can take the lock while the waiter sleeps
    assert_eq!(k.mutex_lock(m, t[1]), Ok(SvcAction::Ret(0)));
}

#[test]
fn cond_signal_wakes_one_in_fifo_order() {
    let k = kernel();
    let t = spawn(&k, 3);
    let m = k.mutex_alloc().unwrap();
    let c = k.cond_alloc().unwrap();

    for &th in &t {
        k.mutex_lock(m, th).unwrap();
        k.cond_wait(c, m, th).unwrap();
    }

    k.cond_signal(c).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));
    assert_eq!(k.thread_state(t[2]), Some(ThreadState::Blocked));

    k.cond_signal(c).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.thread_state(t[2]), Some(ThreadState::Blocked));
}

#[test]
fn cond_broadcast_excludes_later_waiters() {
    let k = kernel();
    let t = spawn(&k, 3);
    let m = k.mutex_alloc().unwrap();
    let c = k.cond_alloc().unwrap();

    for &th in &t[..2] {
        k.mutex_lock(m, th).unwrap();
        k.cond_wait(c, m, th).unwrap();
    }

    k.cond_broadcast(c).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));

    // a thread waiting after the broadcast is not released by it
    k.mutex_lock(m, t[2]).unwrap();
    k.cond_wait(c, m, t[2]).unwrap();
    assert_eq!(k.thread_state(t[2]), Some(ThreadState::Blocked));
}

// ----------------------------------------------------------------------
// Flag
// ----------------------------------------------------------------------

#[test]
fn flag_take_blocks_until_given() {
    let k = kernel();
    let t = spawn(&k, 1);
    let f = k.flag_alloc().unwrap();

    assert_eq!(k.flag_take(f, t[0]), Ok(SvcAction::Block));
    k.flag_give(f).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));

    // handed directly to the waiter, not latched
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(0)));
}

#[test]
fn flag_give_latches_when_nobody_waits() {
    let k = kernel();
    let t = spawn(&k, 1);
    let f = k.flag_alloc().unwrap();

    k.flag_give(f).unwrap();
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(1)));

    // auto-clearing take
    assert_eq!(k.flag_take(f, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(0)));
}

#[test]
fn flag_set_wakes_everyone_and_stays_set() {
    let k = kernel();
    let t = spawn(&k, 3);
    let f = k.flag_alloc().unwrap();

    k.flag_take(f, t[0]).unwrap();
    k.flag_watch(f, t[1]).unwrap();
    k.flag_watch(f, t[2]).unwrap();

    k.flag_set(f).unwrap();
    for &th in &t {
        assert_eq!(k.thread_state(th), Some(ThreadState::Ready));
    }
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(1)));

    k.flag_clr(f).unwrap();
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(0)));
}

#[test]
fn flag_watch_is_level_triggered() {
    let k = kernel();
    let t = spawn(&k, 1);
    let f = k.flag_alloc().unwrap();

    k.flag_set(f).unwrap();
    // set flag: watch returns at once without consuming
    assert_eq!(k.flag_watch(f, t[0]), Ok(SvcAction::Ret(0)));
    assert_eq!(k.flag_val(f), Ok(SvcAction::Ret(1)));
}

// ----------------------------------------------------------------------
// Gate
// ----------------------------------------------------------------------

#[test]
fn gate_admits_one_thread_at_a_time() {
    let k = kernel();
    let t = spawn(&k, 2);
    let g = k.gate_alloc().unwrap();

    // closed gate blocks
    assert_eq!(k.gate_wait(g, t[0]), Ok(SvcAction::Block));

    // open admits the waiter and locks behind it
    k.gate_open(g).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));

    assert_eq!(k.gate_wait(g, t[1]), Ok(SvcAction::Block));

    // leaving closed keeps the second thread out
    k.gate_exit(g, 0, t[0]).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));
}

#[test]
fn gate_open_while_occupied_readmits_exactly_one_on_exit() {
    let k = kernel();
    let t = spawn(&k, 3);
    let g = k.gate_alloc().unwrap();

    k.gate_open(g).unwrap();
    assert_eq!(k.gate_wait(g, t[0]), Ok(SvcAction::Ret(0)));

    k.gate_wait(g, t[1]).unwrap();
    k.gate_wait(g, t[2]).unwrap();

    // signal latches while t0 is inside
    k.gate_open(g).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Blocked));

    k.gate_exit(g, 0, t[0]).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
    assert_eq!(k.thread_state(t[2]), Some(ThreadState::Blocked));
}

#[test]
fn gate_exit_reopen_hands_over() {
    let k = kernel();
    let t = spawn(&k, 2);
    let g = k.gate_alloc().unwrap();

    k.gate_open(g).unwrap();
    assert_eq!(k.gate_wait(g, t[0]), Ok(SvcAction::Ret(0)));
    k.gate_wait(g, t[1]).unwrap();

    k.gate_exit(g, 1, t[0]).unwrap();
    assert_eq!(k.thread_state(t[1]), Some(ThreadState::Ready));
}

#[test]
fn gate_exit_without_holding_is_refused() {
    let k = kernel();
    let t = spawn(&k, 1);
    let g = k.gate_alloc().unwrap();
    assert_eq!(k.gate_exit(g, 0, t[0]), Err(KernelError::Permission));
}

#[test]
fn gate_close_withdraws_the_signal() {
    let k = kernel();
    let t = spawn(&k, 1);
    let g = k.gate_alloc().unwrap();

    k.gate_open(g).unwrap();
    k.gate_close(g).unwrap();
    assert_eq!(k.gate_wait(g, t[0]), Ok(SvcAction::Block));
}

// ----------------------------------------------------------------------
// Event set
// ----------------------------------------------------------------------

#[test]
fn ev_wait_returns_lowest_pending_event() {
    let k = kernel();
    let t = spawn(&k, 1);
    let e = k.ev_alloc().unwrap();

    k.ev_raise(e, 5).unwrap();
    k.ev_raise(e, 3).unwrap();
    assert_eq!(k.ev_wait(e, t[0]), Ok(SvcAction::Ret(3)));
    assert_eq!(k.ev_wait(e, t[0]), Ok(SvcAction::Ret(5)));
    assert_eq!(k.ev_wait(e, t[0]), Ok(SvcAction::Block));
}

#[test]
fn ev_raise_wakes_waiter_with_event_number() {
    let k = kernel();
    let t = spawn(&k, 1);
    let e = k.ev_alloc().unwrap();

    k.ev_wait(e, t[0]).unwrap();
    k.ev_raise(e, 7).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[0]), Some(7));
    assert_eq!(k.ev_pending(e).unwrap(), 0);
}

#[test]
fn ev_mask_defers_delivery_until_unmask() {
    let k = kernel();
    let t = spawn(&k, 1);
    let e = k.ev_alloc().unwrap();

    k.ev_mask(e, 4, 0).unwrap();
    k.ev_wait(e, t[0]).unwrap();
    k.ev_raise(e, 4).unwrap();
    // masked: stays pending, the waiter stays asleep
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Blocked));
    assert_eq!(k.ev_pending(e).unwrap(), 1 << 4);

    k.ev_mask(e, 4, 1).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[0]), Some(4));
}

#[test]
fn ev_wait_all_needs_every_bit() {
    let k = kernel();
    let t = spawn(&k, 1);
    let e = k.ev_alloc().unwrap();
    let want = (1 << 1) | (1 << 2);

    assert_eq!(k.ev_wait_all(e, want, t[0]), Ok(SvcAction::Block));
    k.ev_raise(e, 1).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Blocked));
    k.ev_raise(e, 2).unwrap();
    assert_eq!(k.thread_state(t[0]), Some(ThreadState::Ready));
    assert_eq!(k.thread_svc_ret(t[0]), Some(0));
    // both bits consumed in one step
    assert_eq!(k.ev_pending(e).unwrap(), 0);
}

#[test]
fn ev_clear_drops_a_pending_event() {
    let k = kernel();
    let e = k.ev_alloc().unwrap();
    k.ev_raise(e, 9).unwrap();
    k.ev_clear(e, 9).unwrap();
    assert_eq!(k.ev_pending(e).unwrap(), 0);
}

#[test]
fn ev_pool_exhaustion_and_refill() {
    let k = kernel();
    let mut handles = Vec::new();
    for _ in 0..EVENT_MAX {
        handles.push(k.ev_alloc().unwrap());
    }
    assert_eq!(k.ev_alloc(), Err(KernelError::NoMemory));
    k.ev_free(handles[0]).unwrap();
    assert_eq!(k.ev_alloc().unwrap(), handles[0]);
    assert_eq!(k.ev_alloc(), Err(KernelError::NoMemory));
}

#[cfg(feature = "arg-check")]
#[test]
fn stale_handle_is_rejected() {
    let k = kernel();
    let t = spawn(&k, 1);
    let s = k.sem_alloc(1).unwrap();
    k.sem_free(s).unwrap();
    assert_eq!(k.sem_wait(s, t[0]), Err(KernelError::InvalidArgument));

    // cross-kind misuse is caught by the handle range
    let m = k.mutex_alloc().unwrap();
    assert_eq!(k.sem_wait(m, t[0]), Err(KernelError::InvalidArgument));
}
