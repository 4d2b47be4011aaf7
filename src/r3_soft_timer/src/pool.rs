//! Timer control blocks and the fixed-capacity pool holding them
use core::{fmt, ops};

use crate::{error::AllocTimerError, timer::TimerFn, UTicks};

/// The lifecycle state of a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerState {
    /// The slot hasn't been made available by [`TimerService::init`], or it
    /// was retired by deleting its timer.
    ///
    /// [`TimerService::init`]: crate::TimerService::init
    NotAllocated,
    /// The slot is free and can be handed out by [`TimerService::set`].
    ///
    /// [`TimerService::set`]: crate::TimerService::set
    NotUsed,
    /// The slot holds a timer that is not armed.
    Stopped,
    /// The slot holds an armed timer, which is linked into one of the heaps.
    Running,
}

/// The location of a timer's entry in the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapLink {
    /// The physical heap (`0` or `1`) holding the entry.
    pub(crate) bank: usize,
    /// The entry's position in the heap.
    pub(crate) pos: usize,
}

/// *Timer control block* - the state data of a timer.
#[derive(Clone, Copy)]
pub(crate) struct TimerCb {
    pub(crate) state: TimerState,
    pub(crate) callback: Option<TimerFn>,

    /// The expiration tick, relative to the start of the epoch of the heap
    /// that holds the entry. Meaningless unless `link` is `Some(_)`.
    pub(crate) expiration: UTicks,

    /// Reverse map into the timer queue. `Some(_)` iff `state` is
    /// [`TimerState::Running`], except while the service task is calling the
    /// timer's callback.
    pub(crate) link: Option<HeapLink>,
}

impl TimerCb {
    const INIT: Self = Self {
        state: TimerState::NotAllocated,
        callback: None,
        expiration: 0,
        link: None,
    };
}

impl fmt::Debug for TimerCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("state", &self.state)
            .field("callback", &self.callback.map(|x| x as *const ()))
            .field("expiration", &self.expiration)
            .field("link", &self.link)
            .finish()
    }
}

/// A fixed-capacity array of [`TimerCb`]s.
pub(crate) struct TimerPool<const N: usize> {
    cbs: [TimerCb; N],
}

impl<const N: usize> TimerPool<N> {
    /// Construct a pool in which every slot is [`TimerState::NotAllocated`].
    pub(crate) const fn new() -> Self {
        Self {
            cbs: [TimerCb::INIT; N],
        }
    }

    /// Make every slot available for allocation. Any timers held by the pool
    /// are forgotten.
    pub(crate) fn reset(&mut self) {
        for cb in self.cbs.iter_mut() {
            *cb = TimerCb {
                state: TimerState::NotUsed,
                ..TimerCb::INIT
            };
        }
    }

    /// Find the first [`TimerState::NotUsed`] slot and mark it as
    /// [`TimerState::Stopped`].
    ///
    /// The scan stops at the first [`TimerState::NotAllocated`] slot, which
    /// means a retired slot hides every free slot after it.
    pub(crate) fn allocate(&mut self) -> Result<usize, AllocTimerError> {
        for (i, cb) in self.cbs.iter_mut().enumerate() {
            match cb.state {
                TimerState::NotUsed => {
                    cb.state = TimerState::Stopped;
                    log::debug!("allocated timer slot {}", i);
                    return Ok(i);
                }
                TimerState::NotAllocated => {
                    log::debug!("allocation scan hit unallocated slot {}", i);
                    return Err(AllocTimerError::PoolNotInitialized);
                }
                TimerState::Stopped | TimerState::Running => {}
            }
        }
        Err(AllocTimerError::NoAvailableSlot)
    }

    /// Release the slot `i`. The caller must have removed its entry from the
    /// timer queue.
    pub(crate) fn free(&mut self, i: usize) {
        let cb = &mut self.cbs[i];
        debug_assert!(cb.link.is_none());
        cb.state = if cfg!(feature = "reclaim_slots") {
            TimerState::NotUsed
        } else {
            TimerState::NotAllocated
        };
        cb.callback = None;
        cb.link = None;
        log::debug!("freed timer slot {} ({:?})", i, cb.state);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &TimerCb> + '_ {
        self.cbs.iter()
    }
}

impl<const N: usize> ops::Index<usize> for TimerPool<N> {
    type Output = TimerCb;

    #[inline]
    fn index(&self, i: usize) -> &Self::Output {
        &self.cbs[i]
    }
}

impl<const N: usize> ops::IndexMut<usize> for TimerPool<N> {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.cbs[i]
    }
}

impl<const N: usize> fmt::Debug for TimerPool<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> UTicks {
        0
    }

    #[test]
    fn allocate_before_reset() {
        let mut pool = TimerPool::<4>::new();
        assert_eq!(pool.allocate(), Err(AllocTimerError::PoolNotInitialized));
    }

    #[test]
    fn allocate_until_exhausted() {
        let mut pool = TimerPool::<3>::new();
        pool.reset();
        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(1));
        assert_eq!(pool.allocate(), Ok(2));
        assert_eq!(pool.allocate(), Err(AllocTimerError::NoAvailableSlot));
        assert!(pool.iter().all(|cb| cb.state == TimerState::Stopped));
    }

    #[test]
    fn zero_capacity() {
        let mut pool = TimerPool::<0>::new();
        pool.reset();
        assert_eq!(pool.allocate(), Err(AllocTimerError::NoAvailableSlot));
    }

    #[test]
    #[cfg(not(feature = "reclaim_slots"))]
    fn freed_slot_is_retired() {
        let mut pool = TimerPool::<3>::new();
        pool.reset();
        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(1));
        pool[0].callback = Some(dummy);
        pool.free(0);
        assert_eq!(pool[0].state, TimerState::NotAllocated);
        assert!(pool[0].callback.is_none());

        // The retired slot at the head of the pool blocks the scan
        assert_eq!(pool.allocate(), Err(AllocTimerError::PoolNotInitialized));

        pool.reset();
        assert_eq!(pool.allocate(), Ok(0));
    }

    #[test]
    #[cfg(feature = "reclaim_slots")]
    fn freed_slot_is_reclaimed() {
        let mut pool = TimerPool::<3>::new();
        pool.reset();
        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(1));
        pool[0].callback = Some(dummy);
        pool.free(0);
        assert_eq!(pool[0].state, TimerState::NotUsed);
        assert!(pool[0].callback.is_none());
        assert_eq!(pool.allocate(), Ok(0));
        assert_eq!(pool.allocate(), Ok(2));
    }
}
