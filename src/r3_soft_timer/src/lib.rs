#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
#[macro_use]
mod test_port;

pub mod error;
mod klock;
mod pool;
mod queue;
mod service;
mod timer;
mod utils;


pub use self::{
    error::*,
    pool::TimerState,
    queue::QueueLabel,
    service::TimerService,
    timer::{TimerFn, TimerId, TimerInfo},
};

/// Unsigned integer type representing a tick count and a number of ticks.
pub type UTicks = u32;

/// Implemented by a port. This trait contains items related to the critical
/// section protecting the timer state (*CPU Lock*).
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// ensuring that the timer state is only accessed by one context at a time.
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// Disable all interrupts and preemption that could touch the timer
    /// state.
    ///
    /// # Safety
    ///
    /// CPU Lock must be inactive. Only meant to be called by this crate.
    unsafe fn enter_cpu_lock();

    /// Re-enable the interrupts and preemption disabled by
    /// [`enter_cpu_lock`].
    ///
    /// # Safety
    ///
    /// CPU Lock must be active. Only meant to be called by this crate.
    ///
    /// [`enter_cpu_lock`]: Self::enter_cpu_lock
    unsafe fn leave_cpu_lock();

    /// Activate CPU Lock. Return `true` iff CPU Lock was inactive before the
    /// call.
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Return a flag indicating whether the current context is in a CPU Lock
    /// state.
    fn is_cpu_lock_active() -> bool;
}

/// Implemented by a port. This trait contains items related to the tick
/// counter.
pub trait PortTimer {
    /// The maximum value that [`tick_count`] can return. The counter wraps
    /// around to `0` after reaching this value, i.e., the counter's modulus
    /// is `MAX_TICK_COUNT + 1`.
    ///
    /// This is also the maximum delay accepted by [`TimerService::set`] and
    /// [`TimerService::start`].
    ///
    /// [`tick_count`]: Self::tick_count
    const MAX_TICK_COUNT: UTicks;

    /// The number of ticks the service task sleeps for when there are no
    /// armed timers. Must be in range `1..=UTicks::MAX`.
    const MAX_TIMEOUT: UTicks;

    /// Read the current tick count.
    ///
    /// The returned value must be in range `0..=MAX_TICK_COUNT` and must
    /// increase monotonically (modulo wrap-around).
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate, with CPU Lock active.
    unsafe fn tick_count() -> UTicks;
}

/// Implemented by a port. This trait contains items related to the task that
/// runs the timer service.
///
/// # Safety
///
/// [`service_sleep`] must not return before the requested number of ticks
/// have elapsed unless woken up by [`pend_service_after`].
///
/// [`service_sleep`]: Self::service_sleep
/// [`pend_service_after`]: Self::pend_service_after
pub unsafe trait PortService {
    /// Create a task that runs `entry(param)` with the specified stack size
    /// and priority, and make it eligible for scheduling.
    ///
    /// Called once by [`TimerService::init`]. `entry` never returns.
    fn install_task(
        entry: fn(usize),
        param: usize,
        name: &'static str,
        stack_size: usize,
        priority: usize,
    ) -> Result<(), InstallTaskError>;

    /// Block the service task until `ticks` ticks elapse or a wake-up is
    /// pended by [`pend_service_after`], whichever comes first.
    ///
    /// A wake-up pended while the service task was not sleeping must be
    /// honored by the next call to this method.
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate, from the service task, with
    /// CPU Lock inactive. `ticks` is never zero.
    ///
    /// [`pend_service_after`]: Self::pend_service_after
    unsafe fn service_sleep(ticks: UTicks);

    /// Make the service task wake up within `ticks` ticks from now if it's
    /// sleeping (or about to sleep) for longer than that. `ticks` can be zero.
    ///
    /// # Safety
    ///
    /// Only meant to be called by this crate, with CPU Lock active.
    unsafe fn pend_service_after(ticks: UTicks);
}

/// The trait that combines all port traits. Implemented automatically.
pub trait Port: PortThreading + PortTimer + PortService {}

impl<T: PortThreading + PortTimer + PortService> Port for T {}
