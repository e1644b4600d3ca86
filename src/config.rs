//! Compile-time kernel configuration and the profile descriptor.
//!
//! Pool sizes are fixed at build time; the `KernelProfile` summarizes the
//! compiled-in configuration so host tooling can discover it through the
//! debug monitor without poking at kernel internals.

use bitflags::bitflags;

/// Maximum number of threads. Thread ids are slot indices `0..THREAD_MAX`.
pub const THREAD_MAX: usize = 32;

/// Pseudo thread id for the idle loop. Never appears in the ready bitmap.
pub const IDLE_ID: usize = THREAD_MAX;

pub const MUTEX_MAX: usize = 8;
pub const COND_MAX: usize = 8;
pub const SEM_MAX: usize = 8;
pub const EVENT_MAX: usize = 4;
pub const FLAG_MAX: usize = 8;
pub const GATE_MAX: usize = 8;

/// Hardware breakpoint comparator slots (FPB-style pool).
pub const BP_MAX: usize = 4;
/// Hardware watchpoint comparator slots (DWT-style pool).
pub const WP_MAX: usize = 4;

/// Re-entrant fault bound. One more nested fault past this and the kernel
/// transitions to the terminal `Halt` state instead of retrying.
pub const EXCEPT_UNROLL_MAX: u32 = 8;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 3;

bitflags! {
    /// Feature toggles baked into this build.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProfileFlags: u32 {
        const ARG_CHECK   = 1 << 0;
        const STACK_LIMIT = 1 << 1;
        const TIMED_CALLS = 1 << 2;
        const MONITOR     = 1 << 3;
    }
}

/// Read-only summary of the compiled-in configuration.
///
/// Exposed to host tooling via the monitor `ctl` surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelProfile {
    pub version: (u8, u8),
    pub threads_max: usize,
    pub mutex_max: usize,
    pub cond_max: usize,
    pub sem_max: usize,
    pub event_max: usize,
    pub flag_max: usize,
    pub gate_max: usize,
    pub bp_max: usize,
    pub wp_max: usize,
    pub flags: ProfileFlags,
}

impl KernelProfile {
    pub const fn current() -> Self {
        let mut flags = ProfileFlags::TIMED_CALLS.union(ProfileFlags::MONITOR);
        if cfg!(feature = "arg-check") {
            flags = flags.union(ProfileFlags::ARG_CHECK);
        }
        if cfg!(feature = "stack-limit") {
            flags = flags.union(ProfileFlags::STACK_LIMIT);
        }
        KernelProfile {
            version: (VERSION_MAJOR, VERSION_MINOR),
            threads_max: THREAD_MAX,
            mutex_max: MUTEX_MAX,
            cond_max: COND_MAX,
            sem_max: SEM_MAX,
            event_max: EVENT_MAX,
            flag_max: FLAG_MAX,
            gate_max: GATE_MAX,
            bp_max: BP_MAX,
            wp_max: WP_MAX,
            flags,
        }
    }
}
