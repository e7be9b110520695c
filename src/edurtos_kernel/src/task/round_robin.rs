//! The next-task selection rule
//!
//! The scan starts right after the outgoing task's slot and wraps around,
//! stopping short of the outgoing task's slot. The outgoing task is never
//! picked again, so a lone task whose quantum has run out yields to the idle
//! task for a tick. Priorities play no part in the selection. If the
//! outgoing task is the idle task (which lives outside the regular slots),
//! the scan starts at slot 0 and covers every slot.

/// Find the next Ready slot among `0..num_slots`. `current` may be
/// `num_slots` or greater, which denotes the idle task.
///
/// Returns `None` if no slot other than `current` satisfies `is_ready`, in
/// which case the idle task should run.
pub(crate) fn next_ready_slot(
    current: usize,
    num_slots: usize,
    mut is_ready: impl FnMut(usize) -> bool,
) -> Option<usize> {
    let start = if current >= num_slots { 0 } else { current + 1 };
    (0..num_slots)
        .map(|i| (start + i) % num_slots)
        .filter(|&i| i != current)
        .find(|&i| is_ready(i))
}
