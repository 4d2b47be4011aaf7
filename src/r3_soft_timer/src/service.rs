//! The timer service: the context object and the task that drains the timer
//! queue
use core::fmt;

use crate::{
    klock::{self, CpuLockCell},
    pool::TimerPool,
    queue::TimerQueue,
    Port, PortService, PortTimer, UTicks,
};

/// The name given to the service task.
const SERVICE_TASK_NAME: &str = "timer service";

/// The state protected by CPU Lock.
#[derive(Debug)]
pub(crate) struct ServiceState<const N: usize> {
    pub(crate) pool: TimerPool<N>,
    pub(crate) queue: TimerQueue<N>,
    /// Flag indicating whether a drain pass is in progress. This suppresses
    /// redundant calls to [`PortService::pend_service_after`] made by
    /// callbacks.
    pub(crate) draining: bool,
    /// The timer whose callback is running. Cleared by the API methods that
    /// disarm or re-arm the timer, in which case the callback's return value
    /// is discarded.
    pub(crate) firing: Option<usize>,
    /// Flag indicating whether the service task has been installed.
    installed: bool,
}

impl<const N: usize> ServiceState<N> {
    /// Sample the tick counter and record it in the timer queue.
    ///
    /// Precondition: CPU Lock active
    pub(crate) fn observe_now<Traits: PortTimer>(&mut self) -> UTicks {
        // Safety: CPU Lock active
        let now = unsafe { Traits::tick_count() };
        self.queue.observe(&mut self.pool, now);
        now
    }

    /// Tell the service task when the earliest timer expires. No-op while a
    /// drain pass is in progress because the service task recalculates its
    /// sleep duration at the end of it.
    ///
    /// Precondition: CPU Lock active
    pub(crate) fn pend_service<Traits: PortTimer + PortService>(&self, now: UTicks) {
        if self.draining {
            return;
        }

        let ticks = self.queue.sleep_ticks(&self.pool, now, Traits::MAX_TIMEOUT);

        // Safety: CPU Lock active
        unsafe { Traits::pend_service_after(ticks) };
    }
}

/// A soft-timer service with a capacity of `N` timers.
///
/// This type is `const`-constructible and meant to be placed in a `static`.
/// [`TimerService::init`] must be called before creating timers.
pub struct TimerService<Traits, const N: usize> {
    pub(crate) state: CpuLockCell<Traits, ServiceState<N>>,
}

impl<Traits: Port, const N: usize> TimerService<Traits, N> {
    /// Construct a `TimerService`. No timers can be created until
    /// [`Self::init`] is called.
    pub const fn new() -> Self {
        Self {
            state: CpuLockCell::new(ServiceState {
                pool: TimerPool::new(),
                queue: TimerQueue::new(Traits::MAX_TICK_COUNT),
                draining: false,
                firing: None,
                installed: false,
            }),
        }
    }

    /// Make all `N` slots available, discard all timers, and install the
    /// service task with the specified stack size and priority.
    ///
    /// The service task is only installed by the first call. Subsequent calls
    /// only reset the timers.
    ///
    /// # Panics
    ///
    /// This method panics if CPU Lock is active or the port fails to install
    /// the service task. Either case means the system can't operate.
    pub fn init(&'static self, stack_size: usize, priority: usize) {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            panic!("`TimerService::init` was called with CPU Lock active");
        };

        let state = self.state.write(&mut lock);
        state.pool.reset();
        // Safety: CPU Lock active
        let now = unsafe { Traits::tick_count() };
        state.queue.reset(now);
        state.firing = None;
        let install = !core::mem::replace(&mut state.installed, true);

        // `install_task` is called with CPU Lock inactive
        drop(lock);

        if install {
            log::debug!(
                "installing the timer service task (stack_size = {}, priority = {})",
                stack_size,
                priority
            );
            let param = self as *const Self as usize;
            if let Err(e) = Traits::install_task(
                service_entry::<Traits, N>,
                param,
                SERVICE_TASK_NAME,
                stack_size,
                priority,
            ) {
                panic!("failed to install the timer service task: {:?}", e);
            }
        }
    }

    /// Call the callbacks of all timers that are due and return the number of
    /// ticks until the next timer becomes due (capped at
    /// [`PortTimer::MAX_TIMEOUT`]).
    ///
    /// Each callback is called with CPU Lock inactive. A non-zero return value
    /// re-arms the timer to expire that many ticks after the tick on which it
    /// was found due. Zero deletes the timer.
    ///
    /// This method is the body of the service task's loop. Ports without a
    /// scheduler can call it directly.
    ///
    /// # Panics
    ///
    /// This method panics if CPU Lock is active.
    pub fn run_once(&self) -> UTicks {
        // The precondition includes CPU Lock being inactive, so this `unwrap`
        // should succeed
        let mut lock = klock::lock_cpu::<Traits>().unwrap();

        // Set `draining`. This will suppress redundant calls to
        // `pend_service_after` made by callbacks.
        self.state.write(&mut lock).draining = true;

        let mut num_fired = 0usize;

        // For each iteration, remove the earliest timer if it's due. Exit from
        // the loop if there's none.
        let now = loop {
            let state = self.state.write(&mut lock);
            let now = state.observe_now::<Traits>();

            let Some(i) = state.queue.pop_due(&mut state.pool, now) else {
                break now;
            };

            let callback = state.pool[i].callback;
            state.firing = Some(i);

            // Release CPU Lock before calling the application-provided callback
            // function
            drop(lock);

            let period = match callback {
                Some(callback) => callback(),
                None => {
                    debug_assert!(false, "timer {} has no callback", i);
                    0
                }
            };
            num_fired += 1;

            // Re-acquire CPU Lock. If the callback returned with CPU Lock
            // active, take it over.
            // Safety: The callback's guards, if any, are gone by now
            lock = klock::lock_cpu().unwrap_or_else(|_| unsafe { klock::assume_cpu_lock() });

            let state = self.state.write(&mut lock);
            if state.firing != Some(i) {
                // The callback's timer was stopped or restarted while the
                // callback was running
                log::trace!("timer {} was modified by its callback; ignoring {}", i, period);
                continue;
            }
            state.firing = None;

            if period == 0 {
                state.pool.free(i);
                continue;
            }

            let period = if period > Traits::MAX_TICK_COUNT {
                log::warn!(
                    "timer {} returned a period longer than `MAX_TICK_COUNT` ({} > {}); clamping",
                    i,
                    period,
                    Traits::MAX_TICK_COUNT
                );
                Traits::MAX_TICK_COUNT
            } else {
                period
            };

            // The new expiration is measured from `now`. Ticks may have
            // elapsed while the callback was running.
            let now2 = state.observe_now::<Traits>();
            let elapsed = ticks_between::<Traits>(now, now2);
            state
                .queue
                .insert(&mut state.pool, i, now2, period.saturating_sub(elapsed));
        };

        let state = self.state.write(&mut lock);
        state.draining = false;

        let ticks = state.queue.sleep_ticks(&state.pool, now, Traits::MAX_TIMEOUT);

        log::trace!(
            "timer service pass at {} fired {} timer(s); {} armed, sleeping for {} tick(s)",
            now,
            num_fired,
            state.queue.len(),
            ticks
        );

        ticks
    }

    /// The body of the service task. Alternates between [`Self::run_once`] and
    /// [`PortService::service_sleep`].
    pub fn service_main(&'static self) -> ! {
        loop {
            let ticks = self.run_once();
            if ticks > 0 {
                // Safety: We are the service task, and CPU Lock is inactive
                unsafe { Traits::service_sleep(ticks) };
            }
        }
    }

    /// Call `f` with the internal state. Test only.
    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&ServiceState<N>) -> R) -> R {
        let lock = klock::lock_cpu::<Traits>().unwrap();
        f(self.state.read(&lock))
    }
}

impl<Traits: Port, const N: usize> Default for TimerService<Traits, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: Port, const N: usize> fmt::Debug for TimerService<Traits, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("state", &self.state)
            .finish()
    }
}

/// The entry point of the service task.
fn service_entry<Traits: Port, const N: usize>(param: usize) {
    // Safety: `param` was created from `&'static TimerService<Traits, N>` by
    //         `TimerService::init`
    let service = unsafe { &*(param as *const TimerService<Traits, N>) };
    service.service_main()
}

/// The number of ticks from `from` to `to`, assuming less than one full cycle
/// of the tick counter has passed.
fn ticks_between<Traits: PortTimer>(from: UTicks, to: UTicks) -> UTicks {
    if to >= from {
        to - from
    } else {
        // `to + (MAX_TICK_COUNT + 1) - from`
        Traits::MAX_TICK_COUNT - from + to + 1
    }
}
