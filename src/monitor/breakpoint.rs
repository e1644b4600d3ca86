//! Hardware comparator pools for breakpoints and watchpoints.
//!
//! Slots model the fixed FPB/DWT comparator banks: a `set` allocates a
//! free comparator, `clear` releases it, and a full bank refuses further
//! sets with a pool-exhaustion error. `clear_all` runs on monitor reset.

use crate::config::{BP_MAX, WP_MAX};
use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub addr: u32,
    pub size: u32,
}

pub(crate) struct BreakpointPool {
    slots: [Option<Breakpoint>; BP_MAX],
}

impl BreakpointPool {
    pub(crate) const fn new() -> Self {
        BreakpointPool {
            slots: [None; BP_MAX],
        }
    }

    pub(crate) fn set(&mut self, addr: u32, size: u32) -> KernelResult<()> {
        if self.slots.iter().flatten().any(|bp| bp.addr == addr) {
            return Err(KernelError::InvalidArgument);
        }
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Breakpoint { addr, size });
                return Ok(());
            }
        }
        Err(KernelError::NoMemory)
    }

    pub(crate) fn clear(&mut self, addr: u32) -> KernelResult<()> {
        for slot in self.slots.iter_mut() {
            if slot.map(|bp| bp.addr) == Some(addr) {
                *slot = None;
                return Ok(());
            }
        }
        Err(KernelError::InvalidArgument)
    }

    pub(crate) fn clear_all(&mut self) {
        self.slots = [None; BP_MAX];
    }

    pub(crate) fn slots(&self) -> [Option<Breakpoint>; BP_MAX] {
        self.slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAccess {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchpoint {
    pub addr: u32,
    pub size: u32,
    pub access: WatchAccess,
}

pub(crate) struct WatchpointPool {
    slots: [Option<Watchpoint>; WP_MAX],
}

impl WatchpointPool {
    pub(crate) const fn new() -> Self {
        WatchpointPool {
            slots: [None; WP_MAX],
        }
    }

    pub(crate) fn set(&mut self, addr: u32, size: u32, access: WatchAccess) -> KernelResult<()> {
        if self.slots.iter().flatten().any(|wp| wp.addr == addr) {
            return Err(KernelError::InvalidArgument);
        }
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Watchpoint { addr, size, access });
                return Ok(());
            }
        }
        Err(KernelError::NoMemory)
    }

    pub(crate) fn clear(&mut self, addr: u32) -> KernelResult<()> {
        for slot in self.slots.iter_mut() {
            if slot.map(|wp| wp.addr) == Some(addr) {
                *slot = None;
                return Ok(());
            }
        }
        Err(KernelError::InvalidArgument)
    }

    pub(crate) fn clear_all(&mut self) {
        self.slots = [None; WP_MAX];
    }

    pub(crate) fn slots(&self) -> [Option<Watchpoint>; WP_MAX] {
        self.slots
    }
}
