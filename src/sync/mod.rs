//! Synchronization object pools.
//!
//! Objects are addressed by a flat handle space partitioned into per-kind
//! ranges; the kind is recovered from the handle range, so a mutex handle
//! can never be passed where a semaphore is expected without tripping the
//! argument check. Each object embeds exactly one wait queue.
//!
//! Pools are fixed size. Allocation claims the lowest free slot of a
//! kind; the (K+1)-th allocation of a kind fails with a pool-exhaustion
//! error and freeing one slot enables exactly one more allocation.
//! Freeing an object that still has waiters is refused: the waiters keep
//! their queue and the caller gets a permission error.

mod condvar;
mod event;
mod flag;
mod gate;
mod mutex;
mod semaphore;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize};

use crate::bitmap::Bitmap;
use crate::config::{COND_MAX, EVENT_MAX, FLAG_MAX, GATE_MAX, MUTEX_MAX, SEM_MAX, THREAD_MAX};
use crate::error::{KernelError, KernelResult};
use crate::wq::WaitQueue;

pub const MUTEX_BASE: usize = 0;
pub const COND_BASE: usize = MUTEX_BASE + MUTEX_MAX;
pub const SEM_BASE: usize = COND_BASE + COND_MAX;
pub const EVENT_BASE: usize = SEM_BASE + SEM_MAX;
pub const FLAG_BASE: usize = EVENT_BASE + EVENT_MAX;
pub const GATE_BASE: usize = FLAG_BASE + FLAG_MAX;
pub const JOIN_BASE: usize = GATE_BASE + GATE_MAX;
pub const HANDLE_MAX: usize = JOIN_BASE + THREAD_MAX;

/// No thread; mutex owner sentinel.
pub(crate) const NO_OWNER: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Mutex,
    Cond,
    Sem,
    Event,
    Flag,
    Gate,
    Join,
}

/// Kind of the object a handle addresses, if the handle is in range.
pub fn kind_of(handle: u32) -> Option<ObjKind> {
    let h = handle as usize;
    match h {
        _ if h < COND_BASE => Some(ObjKind::Mutex),
        _ if h < SEM_BASE => Some(ObjKind::Cond),
        _ if h < EVENT_BASE => Some(ObjKind::Sem),
        _ if h < FLAG_BASE => Some(ObjKind::Event),
        _ if h < GATE_BASE => Some(ObjKind::Flag),
        _ if h < JOIN_BASE => Some(ObjKind::Gate),
        _ if h < HANDLE_MAX => Some(ObjKind::Join),
        _ => None,
    }
}

pub(crate) struct MutexObj {
    pub wq: WaitQueue,
    pub owner: AtomicUsize,
}

impl MutexObj {
    const fn new() -> Self {
        MutexObj {
            wq: WaitQueue::new(),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }
}

pub(crate) struct CondObj {
    pub wq: WaitQueue,
    /// Mutex handle recorded at wait time, for introspection only.
    pub mutex: AtomicU32,
}

impl CondObj {
    const fn new() -> Self {
        CondObj {
            wq: WaitQueue::new(),
            mutex: AtomicU32::new(u32::MAX),
        }
    }
}

pub(crate) struct SemObj {
    pub wq: WaitQueue,
    pub count: AtomicU32,
}

impl SemObj {
    const fn new() -> Self {
        SemObj {
            wq: WaitQueue::new(),
            count: AtomicU32::new(0),
        }
    }
}

pub(crate) struct EventObj {
    pub wq: WaitQueue,
    /// Raised events not yet consumed.
    pub pend: Bitmap,
    /// Enabled events; masked-out bits stay pending but never wake.
    pub mask: AtomicU32,
}

impl EventObj {
    const fn new() -> Self {
        EventObj {
            wq: WaitQueue::new(),
            pend: Bitmap::new(),
            mask: AtomicU32::new(u32::MAX),
        }
    }
}

pub(crate) struct FlagObj {
    pub wq: WaitQueue,
    pub val: AtomicBool,
}

impl FlagObj {
    const fn new() -> Self {
        FlagObj {
            wq: WaitQueue::new(),
            val: AtomicBool::new(false),
        }
    }
}

/// Gate state bits.
pub(crate) const GATE_SIGNALED: u8 = 1 << 0;
pub(crate) const GATE_LOCKED: u8 = 1 << 1;

pub(crate) struct GateObj {
    pub wq: WaitQueue,
    pub state: AtomicU8,
}

impl GateObj {
    const fn new() -> Self {
        GateObj {
            wq: WaitQueue::new(),
            state: AtomicU8::new(0),
        }
    }
}

pub struct SyncPool {
    pub(crate) mutex: [MutexObj; MUTEX_MAX],
    pub(crate) mutex_alloc: Bitmap,
    pub(crate) cond: [CondObj; COND_MAX],
    pub(crate) cond_alloc: Bitmap,
    pub(crate) sem: [SemObj; SEM_MAX],
    pub(crate) sem_alloc: Bitmap,
    pub(crate) event: [EventObj; EVENT_MAX],
    pub(crate) event_alloc: Bitmap,
    pub(crate) flag: [FlagObj; FLAG_MAX],
    pub(crate) flag_alloc: Bitmap,
    pub(crate) gate: [GateObj; GATE_MAX],
    pub(crate) gate_alloc: Bitmap,
}

impl SyncPool {
    pub(crate) const fn new() -> Self {
        const MUTEX: MutexObj = MutexObj::new();
        const COND: CondObj = CondObj::new();
        const SEM: SemObj = SemObj::new();
        const EVENT: EventObj = EventObj::new();
        const FLAG: FlagObj = FlagObj::new();
        const GATE: GateObj = GateObj::new();
        SyncPool {
            mutex: [MUTEX; MUTEX_MAX],
            mutex_alloc: Bitmap::new(),
            cond: [COND; COND_MAX],
            cond_alloc: Bitmap::new(),
            sem: [SEM; SEM_MAX],
            sem_alloc: Bitmap::new(),
            event: [EVENT; EVENT_MAX],
            event_alloc: Bitmap::new(),
            flag: [FLAG; FLAG_MAX],
            flag_alloc: Bitmap::new(),
            gate: [GATE; GATE_MAX],
            gate_alloc: Bitmap::new(),
        }
    }

    /// Wait queue embedded in the object `h` addresses.
    pub(crate) fn wq(&self, h: u32) -> Option<&WaitQueue> {
        let idx = h as usize;
        match kind_of(h)? {
            ObjKind::Mutex => Some(&self.mutex[idx - MUTEX_BASE].wq),
            ObjKind::Cond => Some(&self.cond[idx - COND_BASE].wq),
            ObjKind::Sem => Some(&self.sem[idx - SEM_BASE].wq),
            ObjKind::Event => Some(&self.event[idx - EVENT_BASE].wq),
            ObjKind::Flag => Some(&self.flag[idx - FLAG_BASE].wq),
            ObjKind::Gate => Some(&self.gate[idx - GATE_BASE].wq),
            ObjKind::Join => None,
        }
    }

    /// Claim the lowest free slot of a pool.
    pub(crate) fn alloc_slot(alloc: &Bitmap, max: usize) -> KernelResult<usize> {
        for i in 0..max {
            if alloc.set(i) {
                return Ok(i);
            }
        }
        Err(KernelError::NoMemory)
    }
}

/// Range + allocation check shared by the per-kind `*_check` helpers.
/// Allocation tracking is only enforced with `arg-check`; the range check
/// always runs so pool indexing stays in bounds.
pub(crate) fn check_handle(
    handle: u32,
    base: usize,
    max: usize,
    alloc: &Bitmap,
) -> KernelResult<usize> {
    let idx = (handle as usize).wrapping_sub(base);
    if idx >= max {
        return Err(KernelError::InvalidArgument);
    }
    #[cfg(feature = "arg-check")]
    if !alloc.get(idx) {
        return Err(KernelError::InvalidArgument);
    }
    #[cfg(not(feature = "arg-check"))]
    let _ = alloc;
    Ok(idx)
}
