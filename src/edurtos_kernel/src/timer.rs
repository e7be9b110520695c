//! The tick handler
use core::sync::atomic::Ordering;

use crate::{klock, state::Kernel, task::TaskStatus, KernelTraits};

impl<Traits: KernelTraits, const MAX_TASKS: usize> Kernel<Traits, MAX_TASKS> {
    /// The tick handler. Called by a port's tick interrupt handler.
    ///
    /// Advances the tick count, moves every Blocked task whose deadline has
    /// passed back to Ready, and charges one time slice to the running task.
    /// A context switch is requested if a promoted task has a higher
    /// priority than the running task or if the running task has used up
    /// its quantum.
    ///
    /// # Safety
    ///
    /// Only meant to be called by a port, with CPU Lock inactive, from an
    /// interrupt context.
    pub unsafe fn port_timer_tick(&self) {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            Self::halt();
        };

        if !self.started.load(Ordering::Relaxed) {
            return;
        }

        let now = self.tick_count.load(Ordering::Relaxed).wrapping_add(1);
        self.tick_count.store(now, Ordering::Relaxed);

        let running = self.running_task.load(Ordering::Relaxed);
        let Some(running_cb) = self.task_cb(running) else {
            Self::halt();
        };
        let running_priority = running_cb.priority(lock.borrow_mut()).unwrap_or(0);

        let mut preempt = false;

        for (id, task_cb) in self.tasks.iter().enumerate() {
            if *task_cb.st.read(&*lock) != TaskStatus::Blocked {
                continue;
            }

            let Some(wait) = *task_cb.wait.read(&*lock) else {
                continue;
            };

            if !wait.deadline.has_expired(now) {
                continue;
            }

            task_cb.st.replace(&mut *lock, TaskStatus::Ready);
            task_cb.wait.replace(&mut *lock, None);

            log::trace!("deadline of task {} ({:?}) has passed", id, wait.reason);

            if task_cb.priority(lock.borrow_mut()).unwrap_or(0) > running_priority {
                preempt = true;
            }
        }

        // Quantum accounting
        let mut slices = *running_cb.slices.read(&*lock);
        slices.consumed += 1;
        if slices.consumed >= slices.total {
            if *running_cb.st.read(&*lock) == TaskStatus::Running {
                running_cb.st.replace(&mut *lock, TaskStatus::Ready);
            }
            slices.consumed = 0;
            preempt = true;
        }
        running_cb.slices.replace(&mut *lock, slices);

        if preempt {
            // Safety: We are the kernel
            unsafe { Traits::request_dispatch() };
        }
    }
}
