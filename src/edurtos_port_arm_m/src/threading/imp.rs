use core::arch::asm;
use cortex_m::peripheral::scb::{SystemHandler, VectActive};
use edurtos_kernel::StackFrame;

use crate::ThreadingOptions;

/// Set up PendSV, switch Thread mode to PSP, and start executing the task
/// whose initial stack pointer is `sp`. The startup context on MSP is
/// discarded.
///
/// # Safety
///
/// Thread mode, `CONTROL.SPSEL == 0`, CPU Lock active, `sp` points to an
/// initial [`StackFrame`].
pub unsafe fn dispatch_first_task<Traits: ThreadingOptions>(sp: usize) -> ! {
    // Safety: We own the system handler priorities
    unsafe {
        let mut peripherals = cortex_m::Peripherals::steal();
        peripherals
            .SCB
            .set_priority(SystemHandler::PendSV, Traits::PEND_SV_PRIORITY);
    }

    // Safety: `sp` points to an initial `StackFrame`
    unsafe {
        asm!(
            "
            # Make the task's stack current
            msr psp, r0
            movs r1, #2
            msr control, r1
            isb

            # Unstack the frame the way an exception return would do
            ldr r12, [sp, #56]
            orr r12, r12, #1
            pop {{r4-r11}}
            pop {{r0-r3}}
            add sp, sp, #16
            mov lr, #0

            # Release CPU Lock and jump to the entry point
            cpsie i
            bx r12
            ",
            in("r0") sp,
            options(noreturn),
        );
    }
}

#[inline(always)]
pub fn request_dispatch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

#[inline(always)]
pub fn enter_cpu_lock() {
    // Set `PRIMASK` to `1`
    cortex_m::interrupt::disable();
}

/// # Safety
///
/// CPU Lock active, owned by the kernel
#[inline(always)]
pub unsafe fn leave_cpu_lock() {
    // Set `PRIMASK` to `0`
    unsafe { cortex_m::interrupt::enable() };
}

#[inline(always)]
pub fn is_cpu_lock_active() -> bool {
    cortex_m::register::primask::read().is_inactive()
}

pub fn is_task_context() -> bool {
    cortex_m::peripheral::SCB::vect_active() == VectActive::ThreadMode
}

/// Write `frame` below `stack_top` and return the resulting stack pointer.
///
/// # Safety
///
/// `stack_top - StackFrame::SIZE .. stack_top` must be writable.
pub unsafe fn initialize_task_state(stack_top: usize, frame: &StackFrame) -> usize {
    let sp = stack_top - StackFrame::SIZE;

    // In an exception frame, the Thumb bit of the function pointer must be
    // cleared to represent the exact program counter value
    let frame = StackFrame {
        pc: frame.pc & !1,
        ..*frame
    };

    // Safety: Upheld by the caller
    unsafe { (sp as *mut StackFrame).write_volatile(frame) };

    sp
}

#[inline(always)]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// # Safety
///
/// `word` must be valid for reads.
#[inline(always)]
pub unsafe fn load_exclusive(word: *const u32) -> u32 {
    let value: u32;
    // Safety: Upheld by the caller
    unsafe {
        asm!(
            "ldrex {value}, [{word}]",
            word = in(reg) word,
            value = out(reg) value,
            options(nostack, preserves_flags),
        );
    }
    value
}

/// # Safety
///
/// `word` must be valid for writes.
#[inline(always)]
pub unsafe fn store_exclusive(word: *mut u32, value: u32) -> bool {
    let failed: u32;
    // Safety: Upheld by the caller
    unsafe {
        asm!(
            "strex {failed}, {value}, [{word}]",
            word = in(reg) word,
            value = in(reg) value,
            failed = out(reg) failed,
            options(nostack, preserves_flags),
        );
    }
    failed == 0
}

#[inline(always)]
pub fn clear_exclusive() {
    // Safety: `clrex` only affects the local exclusive monitor
    unsafe { asm!("clrex", options(nomem, nostack, preserves_flags)) };
}

#[inline(always)]
pub fn data_memory_barrier() {
    cortex_m::asm::dmb();
}
