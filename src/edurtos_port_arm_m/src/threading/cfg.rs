/// The configuration of the port.
pub trait ThreadingOptions {
    /// Enables the use of the `wfi` instruction in the idle task to save power.
    /// Defaults to `true`.
    const USE_WFI: bool = true;

    /// The priority of PendSV, which performs context switching. Defaults to
    /// `0xff` (the lowest priority) so that a context switch never preempts
    /// another interrupt handler.
    const PEND_SV_PRIORITY: u8 = 0xff;
}

/// Instantiate the port.
///
/// This macro defines a kernel trait type `$Traits` and implements
/// [`PortThreading`] and [`PortExclusive`] on it. It also defines the PendSV
/// handler, which performs context switching for the kernel `$kernel`.
///
/// This macro doesn't provide an implementation of [`PortTimer`], which you
/// must supply by [`use_systick_tickful!`](crate::use_systick_tickful) or
/// other ways.
///
/// [`PortThreading`]: edurtos_kernel::PortThreading
/// [`PortExclusive`]: edurtos_kernel::PortExclusive
/// [`PortTimer`]: edurtos_kernel::PortTimer
///
/// # Safety
///
///  - The target must really be a bare-metal Armv7E-M environment.
///  - You shouldn't interfere with the port's operations. For example, you
///    shouldn't manually modify `PRIMASK` or `CONTROL` unless you know what
///    you are doing.
///  - `$kernel` must be a `static` of type `edurtos_kernel::Kernel<$Traits, _>`.
///  - `$Traits` must also implement [`ThreadingOptions`].
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident; kernel = $kernel:path) => {
        $vis struct $Traits;

        mod port_arm_m_impl {
            use super::$Traits;
            use $crate::edurtos_kernel::{PortExclusive, PortThreading, StackFrame};
            use $crate::threading::{cfg::ThreadingOptions, imp};

            unsafe impl PortThreading for $Traits {
                unsafe fn dispatch_first_task(sp: usize) -> ! {
                    unsafe { imp::dispatch_first_task::<Self>(sp) }
                }

                #[inline(always)]
                unsafe fn request_dispatch() {
                    imp::request_dispatch()
                }

                #[inline(always)]
                unsafe fn enter_cpu_lock() {
                    imp::enter_cpu_lock()
                }

                #[inline(always)]
                unsafe fn leave_cpu_lock() {
                    unsafe { imp::leave_cpu_lock() }
                }

                unsafe fn initialize_task_state(stack_top: usize, frame: &StackFrame) -> usize {
                    unsafe { imp::initialize_task_state(stack_top, frame) }
                }

                #[inline(always)]
                fn is_cpu_lock_active() -> bool {
                    imp::is_cpu_lock_active()
                }

                fn is_task_context() -> bool {
                    imp::is_task_context()
                }

                fn wait_for_interrupt() {
                    if <Self as ThreadingOptions>::USE_WFI {
                        imp::wait_for_interrupt();
                    }
                }

                fn halt() -> ! {
                    imp::halt()
                }
            }

            unsafe impl PortExclusive for $Traits {
                #[inline(always)]
                unsafe fn load_exclusive(word: *const u32) -> u32 {
                    unsafe { imp::load_exclusive(word) }
                }

                #[inline(always)]
                unsafe fn store_exclusive(word: *mut u32, value: u32) -> bool {
                    unsafe { imp::store_exclusive(word, value) }
                }

                #[inline(always)]
                fn clear_exclusive() {
                    imp::clear_exclusive()
                }

                #[inline(always)]
                fn data_memory_barrier() {
                    imp::data_memory_barrier()
                }
            }
        }

        /// Called by the PendSV handler with CPU Lock active.
        extern "C" fn __edurtos_switch_context(saved_sp: usize) -> usize {
            // Safety: We are the port, CPU Lock active
            unsafe { $kernel.port_switch_context(saved_sp) }
        }

        $crate::core::arch::global_asm!(
            "
            .section .text.PendSV, \"ax\"
            .global PendSV
            .type PendSV, %function
            .thumb_func
        PendSV:
            # Save the outgoing task's r4-r11 on its process stack
            cpsid i
            mrs r0, psp
            stmdb r0!, {{r4-r11}}

            # r0 = next_sp = switch_context(saved_sp)
            # (r3 keeps MSP 8-byte aligned)
            push {{r3, lr}}
            bl {switch_context}
            pop {{r3, lr}}

            # Restore the incoming task's r4-r11 and return to it
            ldmia r0!, {{r4-r11}}
            msr psp, r0
            cpsie i
            bx lr
            ",
            switch_context = sym __edurtos_switch_context,
        );
    };
}
