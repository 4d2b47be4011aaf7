//! Result codes and error types
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
            /// use r3_soft_timer::ResultCode;
            /// assert_eq!(ResultCode::NoAvailableSlot.as_str(), "NoAvailableSlot");
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
    /// All result codes (including success) that the timer API can return.
    ///
    /// The values are matched to their closest equivalents in μITRON4.0 so
    /// that they can be passed through a C API unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified timer identifier is out of range.
        BadId = -18,
        /// The current context disallows the operation, e.g., because CPU Lock
        /// is active.
        BadContext = -25,
        /// A required callback or handle was not supplied.
        NullPointer = -26,
        /// There's no free slot left in the timer pool.
        NoAvailableSlot = -34,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// The timer pool has not been initialized, or the allocation scan
        /// reached a retired slot.
        PoolNotInitialized = -42,
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
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
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

// Internal error subsets. These are converted to the public error types by
// `?`.
// ---------------------------------------------------------------------------

define_error! {
    mod bad_context_error {}
    /// `BadContext`
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod bad_id_error {}
    /// `BadId`
    pub(crate) enum BadIdError {
        BadId,
    }
}

define_error! {
    mod bad_param_error {}
    /// `BadParam`
    pub(crate) enum BadParamError {
        BadParam,
    }
}

define_error! {
    mod null_pointer_error {}
    /// `NullPointer`
    pub(crate) enum NullPointerError {
        NullPointer,
    }
}

define_error! {
    mod bad_object_state_error {}
    /// `BadObjectState`
    pub(crate) enum BadObjectStateError {
        BadObjectState,
    }
}

define_error! {
    mod alloc_timer_error {}
    /// The error type of the timer pool's allocation scan.
    pub(crate) enum AllocTimerError {
        NoAvailableSlot,
        PoolNotInitialized,
    }
}

// Public error types
// ---------------------------------------------------------------------------

define_error! {
    mod set_timer_error {}
    /// Error type for [`TimerService::set`].
    ///
    /// [`TimerService::set`]: crate::TimerService::set
    pub enum SetTimerError:
        BadContextError, BadParamError, NullPointerError, AllocTimerError
    {
        /// CPU Lock is active.
        BadContext,
        /// The delay is greater than [`PortTimer::MAX_TICK_COUNT`].
        ///
        /// [`PortTimer::MAX_TICK_COUNT`]: crate::PortTimer::MAX_TICK_COUNT
        BadParam,
        /// The callback is `None`.
        NullPointer,
        /// Every slot of the timer pool is in use.
        NoAvailableSlot,
        /// [`TimerService::init`] hasn't been called yet, or the allocation
        /// scan reached a slot retired by deleting a timer.
        ///
        /// [`TimerService::init`]: crate::TimerService::init
        PoolNotInitialized,
    }
}

define_error! {
    mod get_timer_error {}
    /// Error type for [`TimerService::get`] and [`TimerService::info`].
    ///
    /// [`TimerService::get`]: crate::TimerService::get
    /// [`TimerService::info`]: crate::TimerService::info
    pub enum GetTimerError: BadContextError, BadIdError {
        /// CPU Lock is active.
        BadContext,
        /// The timer identifier is out of range.
        BadId,
    }
}

define_error! {
    mod start_timer_error {}
    /// Error type for [`TimerService::start`].
    ///
    /// [`TimerService::start`]: crate::TimerService::start
    pub enum StartTimerError:
        BadContextError, BadIdError, BadParamError, NullPointerError, BadObjectStateError
    {
        /// CPU Lock is active.
        BadContext,
        /// The timer identifier is out of range.
        BadId,
        /// The delay is greater than [`PortTimer::MAX_TICK_COUNT`].
        ///
        /// [`PortTimer::MAX_TICK_COUNT`]: crate::PortTimer::MAX_TICK_COUNT
        BadParam,
        /// The handle is `None`.
        NullPointer,
        /// The slot doesn't hold an allocated timer (it was deleted or never
        /// allocated).
        BadObjectState,
    }
}

define_error! {
    mod stop_timer_error {}
    /// Error type for [`TimerService::stop`].
    ///
    /// [`TimerService::stop`]: crate::TimerService::stop
    pub enum StopTimerError:
        BadContextError, BadIdError, NullPointerError, BadObjectStateError
    {
        /// CPU Lock is active.
        BadContext,
        /// The timer identifier is out of range.
        BadId,
        /// The handle is `None`.
        NullPointer,
        /// The slot doesn't hold an allocated timer (it was deleted or never
        /// allocated).
        BadObjectState,
    }
}

define_error! {
    mod install_task_error {}
    /// Error type for [`PortService::install_task`].
    ///
    /// [`PortService::install_task`]: crate::PortService::install_task
    pub enum InstallTaskError {
        /// The stack size or the priority is not supported by the port.
        BadParam,
        /// The port can't host another service task.
        BadObjectState,
    }
}
