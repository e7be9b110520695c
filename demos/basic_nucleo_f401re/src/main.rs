//! A producer and a consumer sharing a mailbox, and a monitor printing the
//! task table, on a NUCLEO-F401RE board. Output goes to RTT.
#![deny(unsafe_op_in_unsafe_fn)]
#![no_std]
#![no_main]
#![cfg(target_os = "none")]
use edurtos_kernel::{ms_to_ticks, Kernel, KernelCfg, Mailbox, Mutex, TaskParams, INFINITE};
use edurtos_port_arm_m as port;

// Install a global panic handler that uses RTT
use panic_rtt_target as _;
// Link the board's memory layout and vector table
use nucleo_f401re as _;

port::use_port!(unsafe struct System; kernel = KERNEL);
port::use_systick_tickful!(unsafe impl PortTimer for System; kernel = KERNEL);

impl port::ThreadingOptions for System {
    // Disable the use of WFI because it breaks RTT and debugger connection
    const USE_WFI: bool = false;
}

impl port::SysTickOptions for System {
    // SysTick = HSI (internal 16-MHz RC oscillator)
    const FREQUENCY: u64 = 16_000_000;
}

unsafe impl KernelCfg for System {
    // The SRAM ends at 0x2001_8000. The topmost 4 KiB is left to the main
    // stack, which is used by interrupt handlers.
    const STACK_REGION_TOP: usize = 0x2001_7000;
    const STACK_REGION_SIZE: usize = 16 * 1024;
}

const NUM_TASKS: usize = 4;

static KERNEL: Kernel<System, NUM_TASKS> = Kernel::new();

/// Serializes the output of the tasks
static PRINT_LOCK: Mutex<System> = Mutex::new();

type Messages = Mailbox<'static, System>;

#[cortex_m_rt::entry]
fn main() -> ! {
    rtt_target::rtt_init_print!();

    // `main`'s stack frame doesn't survive `start`, so the mailbox must be
    // placed somewhere else
    let buffer = cortex_m::singleton!(: [u32; 4] = [0; 4]).unwrap();
    let messages: &'static Messages =
        cortex_m::singleton!(: Messages = Messages::new(buffer).unwrap()).unwrap();

    let params = TaskParams([messages as *const Messages as usize, 0, 0, 0]);
    KERNEL.create_task(consumer_body, 3, 1024, params).unwrap();
    KERNEL.create_task(producer_body, 2, 1024, params).unwrap();
    KERNEL
        .create_task(monitor_body, 1, 1024, TaskParams::default())
        .unwrap();

    KERNEL.start()
}

/// # Safety
///
/// `param` must be the address of the mailbox created by `main`.
unsafe fn messages(param: usize) -> &'static Messages {
    // Safety: Upheld by the caller
    unsafe { &*(param as *const Messages) }
}

fn with_print_lock(f: impl FnOnce()) {
    PRINT_LOCK.lock(&KERNEL, INFINITE).unwrap();
    f();
    PRINT_LOCK.unlock(&KERNEL, INFINITE).unwrap();
}

extern "C" fn producer_body(param: usize, _: usize, _: usize, _: usize) -> ! {
    // Safety: `main` passes the mailbox
    let messages = unsafe { messages(param) };

    let mut counter = 0u32;
    loop {
        messages.write(&KERNEL, counter, INFINITE).unwrap();
        counter = counter.wrapping_add(1);
        KERNEL.delay(ms_to_ticks::<System>(500)).unwrap();
    }
}

extern "C" fn consumer_body(param: usize, _: usize, _: usize, _: usize) -> ! {
    // Safety: `main` passes the mailbox
    let messages = unsafe { messages(param) };

    loop {
        let message = messages.read(&KERNEL, INFINITE).unwrap();
        with_print_lock(|| rtt_target::rprintln!("received {}", message));
    }
}

extern "C" fn monitor_body(_: usize, _: usize, _: usize, _: usize) -> ! {
    loop {
        KERNEL.delay(ms_to_ticks::<System>(2000)).unwrap();

        with_print_lock(|| {
            rtt_target::rprintln!("tick = {}", KERNEL.tick_count());
            for id in 0..NUM_TASKS {
                if let Ok(info) = KERNEL.task_info(id) {
                    rtt_target::rprintln!("  {:?}", info);
                }
            }
        });
    }
}
