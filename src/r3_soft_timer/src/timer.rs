//! The timer API
use core::num::NonZeroUsize;

use crate::{
    error::{
        BadIdError, BadObjectStateError, BadParamError, GetTimerError, NullPointerError,
        SetTimerError, StartTimerError, StopTimerError,
    },
    klock::lock_cpu,
    pool::TimerState,
    queue::QueueLabel,
    service::TimerService,
    Port, PortTimer, UTicks,
};

/// Identifies a timer in a [`TimerService`]. Timer identifiers are 1-based
/// slot numbers.
pub type TimerId = NonZeroUsize;

/// A timer callback. The return value is the number of ticks until the next
/// call, or `0` to delete the timer.
pub type TimerFn = fn() -> UTicks;

/// A snapshot of a timer's state, returned by [`TimerService::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    pub state: TimerState,
    /// The heap holding the timer. `None` if the timer is not armed.
    pub queue: Option<QueueLabel>,
    /// The expiration tick, relative to the epoch of [`Self::queue`].
    /// Meaningless if [`Self::queue`] is `None`.
    pub expiration: UTicks,
}

/// Validate a delay value.
fn expect_valid_delay<Traits: PortTimer>(delay: UTicks) -> Result<(), BadParamError> {
    if delay > Traits::MAX_TICK_COUNT {
        Err(BadParamError::BadParam)
    } else {
        Ok(())
    }
}

impl<Traits: Port, const N: usize> TimerService<Traits, N> {
    /// Get the slot index of a timer.
    fn slot_of(id: TimerId) -> Result<usize, BadIdError> {
        let i = id.get() - 1;
        if i < N {
            Ok(i)
        } else {
            Err(BadIdError::BadId)
        }
    }

    fn id_of(i: usize) -> TimerId {
        NonZeroUsize::MIN.saturating_add(i)
    }

    /// Create a timer that calls `callback` and store its identifier in
    /// `handle`.
    ///
    /// The timer is armed to expire `delay` ticks from now if `delay` is
    /// non-zero. Otherwise it's created in the [`TimerState::Stopped`] state
    /// and can be armed later by [`Self::start`].
    ///
    /// `handle` is left untouched on failure.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn set(
        &self,
        handle: &mut Option<TimerId>,
        callback: Option<TimerFn>,
        delay: UTicks,
    ) -> Result<(), SetTimerError> {
        let callback = callback.ok_or(NullPointerError::NullPointer)?;
        expect_valid_delay::<Traits>(delay)?;

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut lock);

        let i = state.pool.allocate()?;
        state.pool[i].callback = Some(callback);

        if delay > 0 {
            let now = state.observe_now::<Traits>();
            state.queue.insert(&mut state.pool, i, now, delay);
            state.pend_service::<Traits>(now);
        }

        *handle = Some(Self::id_of(i));

        Ok(())
    }

    /// Get the number of ticks until the specified timer expires.
    ///
    /// Returns `0` if `handle` is `None`, if the timer is not armed, or if the
    /// timer is overdue.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn get(&self, handle: Option<TimerId>) -> Result<UTicks, GetTimerError> {
        let Some(id) = handle else {
            return Ok(0);
        };
        let i = Self::slot_of(id)?;

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut lock);

        if state.pool[i].state != TimerState::Running {
            return Ok(0);
        }

        let now = state.observe_now::<Traits>();
        Ok(state.queue.remaining(&state.pool, i, now))
    }

    /// Arm the specified timer to expire `delay` ticks from now, restarting
    /// it if it's already armed. If `delay` is zero, the timer is disarmed
    /// instead.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn start(&self, handle: Option<TimerId>, delay: UTicks) -> Result<(), StartTimerError> {
        let id = handle.ok_or(NullPointerError::NullPointer)?;
        let i = Self::slot_of(id)?;
        expect_valid_delay::<Traits>(delay)?;

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut lock);

        if matches!(
            state.pool[i].state,
            TimerState::NotAllocated | TimerState::NotUsed
        ) {
            return Err(BadObjectStateError::BadObjectState.into());
        }

        if state.firing == Some(i) {
            state.firing = None;
        }

        let now = state.observe_now::<Traits>();
        state.queue.remove(&mut state.pool, i);

        if delay > 0 {
            state.queue.insert(&mut state.pool, i, now, delay);
            state.pend_service::<Traits>(now);
        } else {
            state.pool[i].state = TimerState::Stopped;
        }

        Ok(())
    }

    /// Disarm the specified timer. If `delete` is `true`, the timer is
    /// deleted and `handle` becomes invalid.
    ///
    /// Unless the `reclaim_slots` feature is enabled, a deleted timer's slot
    /// is not reused until the next call to [`Self::init`].
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn stop(&self, handle: Option<TimerId>, delete: bool) -> Result<(), StopTimerError> {
        let id = handle.ok_or(NullPointerError::NullPointer)?;
        let i = Self::slot_of(id)?;

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut lock);

        if matches!(
            state.pool[i].state,
            TimerState::NotAllocated | TimerState::NotUsed
        ) {
            return Err(BadObjectStateError::BadObjectState.into());
        }

        if state.firing == Some(i) {
            state.firing = None;
        }

        state.observe_now::<Traits>();
        state.queue.remove(&mut state.pool, i);

        if delete {
            state.pool.free(i);
        } else {
            state.pool[i].state = TimerState::Stopped;
        }

        Ok(())
    }

    /// Get a snapshot of the specified timer's state.
    pub fn info(&self, id: TimerId) -> Result<TimerInfo, GetTimerError> {
        let i = Self::slot_of(id)?;

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut lock);
        state.observe_now::<Traits>();

        let cb = &state.pool[i];
        Ok(TimerInfo {
            state: cb.state,
            queue: cb.link.map(|link| state.queue.label_of(link.bank)),
            expiration: cb.expiration,
        })
    }
}
