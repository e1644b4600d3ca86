//! Opaque context swap.
//!
//! The contract is the whole interface: `swap` preserves the full register
//! set of the outgoing thread, resumes the incoming one, and has a single
//! return point. The outgoing stack pointer is written only into the slot
//! passed by the outgoing thread itself; no other context ever writes it.
//!
//! Callee-saved registers live on the thread's own stack; the context
//! record carries the stack pointer plus a resume address mirror that the
//! kernel maintains at suspension points so the debug monitor can inspect
//! and patch a paused thread without disassembling its stack frame.

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    /// Saved stack pointer. Written by `swap` during switch-out.
    pub sp: usize,
    /// Resume address mirror, maintained at suspension points.
    pub pc: usize,
}

impl CpuContext {
    pub const fn new() -> Self {
        CpuContext { sp: 0, pc: 0 }
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

/// # Safety
/// `save` and `restore` must point to valid contexts; the stack under
/// `restore.sp` must hold a frame previously produced by `swap` or by
/// `seed_stack`. Must not be called from interrupt context.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn swap(save: *mut CpuContext, restore: *const CpuContext) {
    core::arch::naked_asm!(
        "
        push rbp
        push rbx
        push r12
        push r13
        push r14
        push r15
        pushfq

        mov [rdi], rsp
        mov rsp, [rsi]

        popfq
        pop r15
        pop r14
        pop r13
        pop r12
        pop rbx
        pop rbp

        ret
        "
    );
}

/// # Safety
/// Same contract as the x86_64 variant.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn swap(save: *mut CpuContext, restore: *const CpuContext) {
    core::arch::naked_asm!(
        "
        stp x19, x20, [sp, #-96]!
        stp x21, x22, [sp, #16]
        stp x23, x24, [sp, #32]
        stp x25, x26, [sp, #48]
        stp x27, x28, [sp, #64]
        stp x29, x30, [sp, #80]

        mov x9, sp
        str x9, [x0]
        ldr x9, [x1]
        mov sp, x9

        ldp x29, x30, [sp, #80]
        ldp x27, x28, [sp, #64]
        ldp x25, x26, [sp, #48]
        ldp x23, x24, [sp, #32]
        ldp x21, x22, [sp, #16]
        ldp x19, x20, [sp], #96

        ret
        "
    );
}

/// Fallback for targets without a swap implementation. Logic-level users
/// (unit tests, host tooling) never reach a real switch; a port that does
/// must supply one of the arch variants above.
///
/// # Safety
/// See the arch variants.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub unsafe fn swap(save: *mut CpuContext, restore: *const CpuContext) {
    unsafe {
        (*save).sp = 0;
        let _ = (*restore).sp;
    }
    log::error!("context swap invoked on an unsupported target");
    loop {
        core::hint::spin_loop();
    }
}

/// Number of machine words `swap` pushes before saving the stack pointer.
#[cfg(target_arch = "x86_64")]
pub const FRAME_WORDS: usize = 7;
#[cfg(target_arch = "aarch64")]
pub const FRAME_WORDS: usize = 12;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const FRAME_WORDS: usize = 0;
