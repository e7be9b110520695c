//! Task stacks
use core::mem;

use super::{TaskFn, TaskParams};

/// The initial register frame placed at the top of a new task's stack.
///
/// The lower half is what the context switch handler saves and restores by
/// itself. The upper half is what the processor stacks on exception entry,
/// in the order defined by the Armv7-M exception model, so that returning
/// from the context switch handler starts the task at `pc` with its four
/// arguments in `r0`-`r3`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// `r4`-`r11`
    pub callee_saved: [usize; 8],
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
}

impl StackFrame {
    /// The program status register value of a new task: Thumb state, no
    /// flags set.
    pub const XPSR_THUMB: usize = 0x0100_0000;

    /// Construct the frame that starts `entry` with `params`. All other
    /// registers are zero.
    pub fn initial(entry: TaskFn, params: &TaskParams) -> Self {
        let [r0, r1, r2, r3] = params.0;
        Self {
            callee_saved: [0; 8],
            r0,
            r1,
            r2,
            r3,
            r12: 0,
            lr: 0,
            pc: entry as usize,
            xpsr: Self::XPSR_THUMB,
        }
    }

    /// The frame size, measured in bytes.
    pub const SIZE: usize = mem::size_of::<Self>();
}

/// The bump allocator that carves task stacks out of the stack region,
/// growing downward from its top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackRegion {
    /// The upper end of the next stack to be allocated.
    next_top: usize,
    /// The lower end of the region.
    bottom: usize,
}

impl StackRegion {
    /// Construct a `StackRegion` covering `top - size .. top`. `top` is
    /// rounded down to `align`.
    pub(crate) const fn new(top: usize, size: usize, align: usize) -> Self {
        Self {
            next_top: top & !(align - 1),
            bottom: top.saturating_sub(size),
        }
    }

    /// Allocate a stack of at least `size` bytes. `size` is rounded up to
    /// `align`. Returns the upper end of the new stack, or `None` if the
    /// region is exhausted.
    pub(crate) fn allocate(&mut self, size: usize, align: usize) -> Option<(usize, usize)> {
        let size = size.checked_add(align - 1)? & !(align - 1);
        let new_next_top = self.next_top.checked_sub(size)?;
        if new_next_top < self.bottom {
            return None;
        }
        let top = mem::replace(&mut self.next_top, new_next_top);
        Some((top, size))
    }

    /// Get the number of bytes still available.
    pub(crate) fn remaining(&self) -> usize {
        self.next_top.saturating_sub(self.bottom)
    }
}
