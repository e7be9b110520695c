//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use edurtos_kernel::ResultCode;
            /// assert_eq!(ResultCode::QueueOverflow.as_str(), "QueueOverflow");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation can
    /// produce.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// A parameter is invalid in a way that is not covered by any other
        /// error codes.
        BadParam = -17,
        /// The specified task identifier does not refer to a created task.
        BadId = -18,
        /// The current context disallows the operation.
        BadContext = -25,
        /// The stack region is exhausted.
        NoMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// A counter would exceed its upper bound.
        QueueOverflow = -43,
        /// The mailbox has no free slot.
        Full = -46,
        /// The mailbox has no stored message.
        Empty = -47,
        /// The operation timed out.
        Timeout = -50,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Shares the discriminant with `ResultCode`
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// Error type for operations that only fail when called from a wrong
    /// context.
    pub enum BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod init_error {}
    /// Error type for [`Kernel::init`].
    ///
    /// [`Kernel::init`]: crate::Kernel::init
    pub enum InitError: BadContextError {
        /// CPU Lock is active, or the scheduler has already started.
        BadContext,
        /// The idle task already exists.
        BadObjectState,
        /// The stack region cannot accommodate the idle task's stack.
        NoMemory,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`Kernel::create_task`].
    ///
    /// [`Kernel::create_task`]: crate::Kernel::create_task
    pub enum CreateTaskError: BadContextError {
        /// The priority is outside `1..=MAX_TASKS`, or the stack size is
        /// smaller than [`KernelCfg::TASK_MIN_STACK_SIZE`].
        ///
        /// [`KernelCfg::TASK_MIN_STACK_SIZE`]: crate::KernelCfg::TASK_MIN_STACK_SIZE
        BadParam,
        /// CPU Lock is active, or the scheduler has already started.
        BadContext,
        /// The stack region cannot accommodate the requested stack.
        NoMemory,
        /// A task with the same priority already exists.
        BadObjectState,
    }
}

define_error! {
    mod delay_error {}
    /// Error type for [`Kernel::delay`].
    ///
    /// [`Kernel::delay`]: crate::Kernel::delay
    pub enum DelayError: BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod get_task_info_error {}
    /// Error type for [`Kernel::task_info`].
    ///
    /// [`Kernel::task_info`]: crate::Kernel::task_info
    pub enum GetTaskInfoError: BadContextError {
        /// The task identifier doesn't refer to a created task.
        BadId,
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod lock_mutex_error {}
    /// Error type for [`Mutex::lock`].
    ///
    /// [`Mutex::lock`]: crate::Mutex::lock
    pub enum LockMutexError: BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// The mutex couldn't be acquired before the timeout.
        Timeout,
    }
}

define_error! {
    mod unlock_mutex_error {}
    /// Error type for [`Mutex::unlock`].
    ///
    /// [`Mutex::unlock`]: crate::Mutex::unlock
    pub enum UnlockMutexError: BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// The mutex is held by another task and stayed so until the timeout.
        Timeout,
    }
}

define_error! {
    mod wait_semaphore_error {}
    /// Error type for [`Semaphore::take`].
    ///
    /// [`Semaphore::take`]: crate::Semaphore::take
    pub enum WaitSemaphoreError: BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// No permit became available before the timeout.
        Timeout,
    }
}

define_error! {
    mod signal_semaphore_error {}
    /// Error type for [`Semaphore::give`].
    ///
    /// [`Semaphore::give`]: crate::Semaphore::give
    pub enum SignalSemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// The permit count is already at its maximum value.
        QueueOverflow,
        /// The count couldn't be updated before the timeout.
        Timeout,
    }
}

define_error! {
    mod init_mailbox_error {}
    /// Error type for [`Mailbox::new`].
    ///
    /// [`Mailbox::new`]: crate::Mailbox::new
    pub enum InitMailboxError {
        /// The buffer is empty or too large.
        BadParam,
    }
}

define_error! {
    mod write_mailbox_error {}
    /// Error type for [`Mailbox::write`].
    ///
    /// [`Mailbox::write`]: crate::Mailbox::write
    pub enum WriteMailboxError: BadContextError, WaitSemaphoreError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// No slot became free before the timeout.
        Timeout,
        /// A free-slot permit was obtained, but the ring buffer was found
        /// full.
        Full,
    }
}

define_error! {
    mod read_mailbox_error {}
    /// Error type for [`Mailbox::read`].
    ///
    /// [`Mailbox::read`]: crate::Mailbox::read
    pub enum ReadMailboxError: BadContextError, WaitSemaphoreError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// No message arrived before the timeout.
        Timeout,
        /// A message permit was obtained, but the ring buffer was found
        /// empty.
        Empty,
    }
}
