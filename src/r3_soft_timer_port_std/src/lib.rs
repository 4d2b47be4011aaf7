#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use r3_soft_timer::{InstallTaskError, Port, PortTimer, UTicks};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate r3_soft_timer;

/// The minimum stack size of the service thread.
pub const MIN_STACK_SIZE: usize = 0x10000;

/// How long [`wait_for_service_idle`] waits for the service thread before
/// giving up.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Implemented on a port type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: Port {
    fn port_state() -> &'static State;
}

thread_local! {
    /// The address of the [`State`] whose CPU Lock is held by the current
    /// thread, or `0` if there's none.
    static CPU_LOCK_HOLDER: Cell<usize> = Cell::new(0);
}

/// The simulated tick counter and the service thread's sleep state.
#[derive(Debug)]
struct Clock {
    /// The number of ticks elapsed since startup. This one doesn't wrap
    /// around; [`State::tick_count`] does.
    ticks: u64,
    /// The tick at which the sleeping service thread wakes up. `None` if the
    /// service thread is not sleeping.
    wake_at: Option<u64>,
    /// The earliest wake-up requested while the service thread was not
    /// sleeping. Consumed by the next call to [`State::service_sleep`].
    pended: Option<u64>,
}

impl Clock {
    /// Get a flag indicating whether the service thread is sleeping and is
    /// not due to wake up yet.
    fn is_service_idle(&self) -> bool {
        matches!(self.wake_at, Some(at) if self.ticks < at)
    }
}

/// The internal state of the port.
#[doc(hidden)]
pub struct State {
    /// Held while the CPU Lock of this port is active. The guard is leaked by
    /// [`Self::enter_cpu_lock`] and released by [`Self::leave_cpu_lock`].
    cpu_lock: SpinMutex<()>,
    clock: Mutex<Clock>,
    /// Notified whenever `clock` changes.
    clock_changed: Condvar,
    service_installed: AtomicBool,
}

#[allow(clippy::missing_safety_doc)]
impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock: SpinMutex::new(()),
            clock: Mutex::new(Clock {
                ticks: 0,
                wake_at: None,
                pended: None,
            }),
            clock_changed: Condvar::new(),
            service_installed: AtomicBool::new(false),
        }
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn lock_clock(&self) -> MutexGuard<'_, Clock> {
        // `Clock` is updated atomically, so it's consistent even if a thread
        // panicked while holding the lock
        self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub unsafe fn enter_cpu_lock(&self) {
        log::trace!("enter_cpu_lock");
        CPU_LOCK_HOLDER.with(|holder| {
            assert_eq!(
                holder.get(),
                0,
                "the current thread is already in a CPU Lock state"
            );
            core::mem::forget(self.cpu_lock.lock());
            holder.set(self.addr());
        });
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");
        CPU_LOCK_HOLDER.with(|holder| {
            assert_eq!(holder.get(), self.addr(), "CPU Lock is not active");
            holder.set(0);
        });

        // Safety: The guard was leaked by `enter_cpu_lock` on this thread
        unsafe { self.cpu_lock.force_unlock() };
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        CPU_LOCK_HOLDER.with(|holder| holder.get() == self.addr())
    }

    pub fn tick_count<Traits: PortInstance>(&self) -> UTicks {
        let ticks = self.lock_clock().ticks;

        // `ticks % (MAX_TICK_COUNT + 1)`
        (ticks % (u64::from(<Traits as PortTimer>::MAX_TICK_COUNT) + 1)) as UTicks
    }

    pub fn install_task(
        &self,
        entry: fn(usize),
        param: usize,
        name: &'static str,
        stack_size: usize,
        priority: usize,
    ) -> Result<(), InstallTaskError> {
        log::debug!("install_task({name:?}, stack_size = {stack_size}, priority = {priority})");

        if stack_size == 0 {
            return Err(InstallTaskError::BadParam);
        }

        if self.service_installed.swap(true, Ordering::AcqRel) {
            return Err(InstallTaskError::BadObjectState);
        }

        thread::Builder::new()
            .name(name.to_owned())
            .stack_size(stack_size.max(MIN_STACK_SIZE))
            .spawn(move || {
                log::debug!("{name:?} is now running");
                entry(param);
            })
            .map(drop)
            .map_err(|e| {
                log::error!("failed to spawn a thread for {name:?}: {e}");
                self.service_installed.store(false, Ordering::Release);
                InstallTaskError::BadObjectState
            })
    }

    pub fn service_sleep(&self, ticks: UTicks) {
        let mut clock = self.lock_clock();

        let mut wake_at = clock.ticks + u64::from(ticks);
        if let Some(pended) = clock.pended.take() {
            wake_at = wake_at.min(pended);
        }
        log::trace!("service_sleep({ticks}): {} -> {wake_at}", clock.ticks);

        clock.wake_at = Some(wake_at);
        self.clock_changed.notify_all();

        let mut clock = self
            .clock_changed
            .wait_while(clock, |clock| clock.is_service_idle())
            .unwrap_or_else(|e| e.into_inner());

        clock.wake_at = None;
        log::trace!("the service thread woke up at {}", clock.ticks);
        self.clock_changed.notify_all();
    }

    pub fn pend_service_after(&self, ticks: UTicks) {
        let mut clock = self.lock_clock();
        let at = clock.ticks + u64::from(ticks);
        log::trace!("pend_service_after({ticks}): wake up at {at}");

        match clock.wake_at {
            Some(wake_at) if at < wake_at => {
                clock.wake_at = Some(at);
                self.clock_changed.notify_all();
            }
            Some(_) => {}
            None => clock.pended = Some(clock.pended.map_or(at, |pended| pended.min(at))),
        }
    }

    fn advance_ticks(&self, ticks: u64) {
        let mut clock = self.lock_clock();
        clock.ticks += ticks;
        log::trace!("advance_ticks({ticks}): now at {}", clock.ticks);
        self.clock_changed.notify_all();
    }

    fn ticks(&self) -> u64 {
        self.lock_clock().ticks
    }

    fn wait_for_service_idle(&self) {
        let clock = self.lock_clock();
        let (_clock, result) = self
            .clock_changed
            .wait_timeout_while(clock, IDLE_TIMEOUT, |clock| !clock.is_service_idle())
            .unwrap_or_else(|e| e.into_inner());
        assert!(
            !result.timed_out(),
            "the service thread didn't go to sleep in {IDLE_TIMEOUT:?}"
        );
    }
}

/// Initialize `env_logger`. Does nothing if a logger is already set.
pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// Get the number of ticks elapsed since startup. Unlike
/// [`PortTimer::tick_count`], this doesn't wrap around.
///
/// [`PortTimer::tick_count`]: r3_soft_timer::PortTimer::tick_count
pub fn ticks<Traits: PortInstance>() -> u64 {
    Traits::port_state().ticks()
}

/// Advance the simulated tick counter by `ticks`.
///
/// This may skip over several timer expirations. Use [`run_until`] to make the
/// service thread observe every tick.
pub fn advance_ticks<Traits: PortInstance>(ticks: u64) {
    Traits::port_state().advance_ticks(ticks);
}

/// Block the current thread until the service thread goes to sleep and is
/// not due to wake up at the current tick.
///
/// # Panics
///
/// This function panics if that doesn't happen in a few seconds, e.g.,
/// because the service was not initialized.
pub fn wait_for_service_idle<Traits: PortInstance>() {
    Traits::port_state().wait_for_service_idle();
}

/// Advance the simulated tick counter one tick at a time until it reaches
/// `tick` (as returned by [`ticks`]), waiting for the service thread to
/// finish its work after each step.
pub fn run_until<Traits: PortInstance>(tick: u64) {
    let state = Traits::port_state();
    state.wait_for_service_idle();
    while state.ticks() < tick {
        state.advance_ticks(1);
        state.wait_for_service_idle();
    }
}

/// A thread advancing the simulated tick counter in real time, created by
/// [`start_ticker`]. The thread stops when this is dropped.
#[derive(Debug)]
pub struct Ticker {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("the ticker thread panicked");
            }
        }
    }
}

/// Start a thread that advances the simulated tick counter by one every
/// `period`.
///
/// # Panics
///
/// This function panics if the thread can't be spawned.
pub fn start_ticker<Traits: PortInstance>(period: Duration) -> Ticker {
    let stop = Arc::new(AtomicBool::new(false));

    let thread = thread::Builder::new()
        .name("ticker".to_owned())
        .spawn({
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(period);
                    Traits::port_state().advance_ticks(1);
                }
            }
        })
        .unwrap_or_else(|e| panic!("failed to spawn the ticker thread: {e}"));

    Ticker {
        stop,
        thread: Some(thread),
    }
}

/// Instantiate the port. Implements the port traits on the specified type.
///
/// ```rust,ignore
/// r3_soft_timer_port_std::use_port!(unsafe pub struct Traits, max_tick_count = 999, max_timeout = 100);
/// ```
///
/// `max_tick_count` and `max_timeout` default to `UTicks::MAX` and
/// `UTicks::MAX / 2` respectively.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $crate::use_port!(
            unsafe $vis struct $Traits,
            max_tick_count = $crate::r3_soft_timer::UTicks::MAX,
            max_timeout = $crate::r3_soft_timer::UTicks::MAX / 2,
        );
    };
    (
        unsafe $vis:vis struct $Traits:ident,
        max_tick_count = $max_tick_count:expr,
        max_timeout = $max_timeout:expr $(,)?
    ) => {
        $vis struct $Traits;

        const _: () = {
            use $crate::{
                r3_soft_timer::{
                    InstallTaskError, PortService, PortThreading, PortTimer, UTicks,
                },
                PortInstance, State,
            };

            static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $Traits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            unsafe impl PortThreading for $Traits {
                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }
            }

            impl PortTimer for $Traits {
                const MAX_TICK_COUNT: UTicks = $max_tick_count;
                const MAX_TIMEOUT: UTicks = $max_timeout;

                unsafe fn tick_count() -> UTicks {
                    PORT_STATE.tick_count::<Self>()
                }
            }

            unsafe impl PortService for $Traits {
                fn install_task(
                    entry: fn(usize),
                    param: usize,
                    name: &'static str,
                    stack_size: usize,
                    priority: usize,
                ) -> Result<(), InstallTaskError> {
                    PORT_STATE.install_task(entry, param, name, stack_size, priority)
                }

                unsafe fn service_sleep(ticks: UTicks) {
                    PORT_STATE.service_sleep(ticks)
                }

                unsafe fn pend_service_after(ticks: UTicks) {
                    PORT_STATE.pend_service_after(ticks)
                }
            }
        };
    };
}

#[cfg(test)]
mod tests;
