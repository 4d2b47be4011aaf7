//! The timer queue: two binary min-heaps used as a double-buffered priority
//! queue that survives the wrap-around of the tick counter
use arrayvec::ArrayVec;

use crate::{
    pool::{HeapLink, TimerPool, TimerState},
    utils::{BinaryHeap, BinaryHeapCtx, VecLike},
    UTicks,
};

/// The role of a heap in the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueLabel {
    /// The heap of the timers that expire in the current epoch of the tick
    /// counter (or, while a wrap-around is pending, in the epoch that just
    /// ended).
    Current,
    /// The heap of the timers that expire after the next wrap-around.
    Future,
}

/// The heap context. Orders pool indices by their expiration tick and keeps
/// [`TimerCb::link`] up-to-date.
///
/// [`TimerCb::link`]: crate::pool::TimerCb::link
struct QueueCtx<'a, const N: usize> {
    pool: &'a mut TimerPool<N>,
    bank: usize,
}

impl<'a, const N: usize> QueueCtx<'a, N> {
    #[inline]
    fn new(pool: &'a mut TimerPool<N>, bank: usize) -> Self {
        Self { pool, bank }
    }
}

impl<const N: usize> BinaryHeapCtx<usize> for QueueCtx<'_, N> {
    #[inline]
    fn lt(&mut self, x: &usize, y: &usize) -> bool {
        self.pool[*x].expiration < self.pool[*y].expiration
    }

    #[inline]
    fn on_move(&mut self, e: &mut usize, new_index: usize) {
        self.pool[*e].link = Some(HeapLink {
            bank: self.bank,
            pos: new_index,
        });
    }
}

type Heap<const N: usize> = ArrayVec<usize, N>;

#[doc = svgbobdoc::transform!(
/// The timer queue.
///
/// Expiration ticks are stored as plain tick counts, which are only comparable
/// within one *epoch* (a full cycle of the tick counter). Each of the two
/// physical heaps holds the timers of one epoch. A timer whose target
/// `now + delay` exceeds [`PortTimer::MAX_TICK_COUNT`] goes to the future heap
/// with the target reduced by the modulus `M = MAX_TICK_COUNT + 1`.
///
/// ```svgbob
///                 now       M - 1 | 0
///  tick  ----------+--------------+-------------------------->
///                  |              |
///                  | now + delay  |   now + delay - M
///                  |    |         |       |
///                  v    v         |       v
///             .-----------------. | .-------------------.
///             |  current heap   | | |   future heap     |
///             '-----------------' | '-------------------'
///                                 |
///                   wrap: swap the labels once the
///                   current heap has drained
/// ```
///
/// A wrap-around is detected when the sampled tick count goes backwards. If
/// the current heap still holds entries at that point, they are all overdue;
/// the queue enters the *wrap-pending* state until the service task drains
/// them, and the future heap receives the timers of the new epoch in the
/// meantime. The service task never sleeps past a wrap-around while a timer is
/// armed, so every wrap-around is observed.
///
/// [`PortTimer::MAX_TICK_COUNT`]: crate::PortTimer::MAX_TICK_COUNT
)]
pub(crate) struct TimerQueue<const N: usize> {
    heaps: [Heap<N>; 2],
    /// The physical index of the heap labeled [`QueueLabel::Current`].
    current: usize,
    /// `MAX_TICK_COUNT + 1`
    modulus: u64,
    /// The most recently observed tick count.
    last_tick: UTicks,
    /// The tick counter has wrapped around, but the current heap hasn't
    /// drained yet.
    wrap_pending: bool,
}

impl<const N: usize> TimerQueue<N> {
    pub(crate) const fn new(max_tick_count: UTicks) -> Self {
        Self {
            heaps: [Heap::<N>::DEFAULT, Heap::<N>::DEFAULT],
            current: 0,
            modulus: max_tick_count as u64 + 1,
            last_tick: 0,
            wrap_pending: false,
        }
    }

    /// Remove all entries. The caller is responsible for resetting the pool.
    pub(crate) fn reset(&mut self, now: UTicks) {
        for heap in self.heaps.iter_mut() {
            heap.clear();
        }
        self.current = 0;
        self.last_tick = now;
        self.wrap_pending = false;
    }

    #[inline]
    fn future(&self) -> usize {
        self.current ^ 1
    }

    /// The physical heap holding the timers of the epoch `now` belongs to.
    #[inline]
    fn present(&self) -> usize {
        if self.wrap_pending {
            self.future()
        } else {
            self.current
        }
    }

    pub(crate) fn label_of(&self, bank: usize) -> QueueLabel {
        if bank == self.current {
            QueueLabel::Current
        } else {
            QueueLabel::Future
        }
    }

    #[cfg(test)]
    pub(crate) fn is_wrap_pending(&self) -> bool {
        self.wrap_pending
    }

    /// Record a tick count sampled in the current critical section and detect
    /// a wrap-around.
    pub(crate) fn observe(&mut self, pool: &mut TimerPool<N>, now: UTicks) {
        if now < self.last_tick {
            if self.wrap_pending {
                // Two wrap-arounds without draining the current heap in
                // between. Everything in both heaps is overdue now.
                log::warn!("the tick counter wrapped twice before the timer service caught up");
                self.settle(pool);
            }
            log::trace!("tick counter wrapped around ({} → {})", self.last_tick, now);
            self.wrap_pending = true;
        }
        self.last_tick = now;
        self.complete_wrap();
    }

    /// Swap the labels if a wrap-around is pending and the current heap is
    /// empty.
    fn complete_wrap(&mut self) {
        if self.wrap_pending && self.heaps[self.current].is_empty() {
            self.current = self.future();
            self.wrap_pending = false;
            log::trace!("swapped the timer heaps (current = {})", self.current);
        }
    }

    /// Move the overdue entries of the current heap to the future heap with
    /// expiration `0` and swap the labels, ending the wrap-pending state.
    fn settle(&mut self, pool: &mut TimerPool<N>) {
        debug_assert!(self.wrap_pending);
        let (from, to) = (self.current, self.future());
        log::trace!(
            "moving {} overdue timer(s) into the heap of the new epoch",
            self.heaps[from].len()
        );

        while let Some(i) = self.heaps[from].heap_pop(QueueCtx::new(pool, from)) {
            pool[i].expiration = 0;
            self.heaps[to].heap_push(i, QueueCtx::new(pool, to));
        }

        self.current = to;
        self.wrap_pending = false;
    }

    /// Arm the timer `i` to expire `delay` ticks after `now`. The timer must
    /// not be in the queue. `delay` must be in range `0..=MAX_TICK_COUNT`.
    ///
    /// [`Self::observe`] must have been called with `now`.
    pub(crate) fn insert(&mut self, pool: &mut TimerPool<N>, i: usize, now: UTicks, delay: UTicks) {
        debug_assert!(pool[i].link.is_none());
        debug_assert!((delay as u64) < self.modulus);

        let target = now as u64 + delay as u64;
        let (bank, expiration) = if target < self.modulus {
            (self.present(), target)
        } else {
            if self.wrap_pending {
                self.settle(pool);
            }
            (self.future(), target - self.modulus)
        };

        let cb = &mut pool[i];
        cb.expiration = expiration as UTicks;
        cb.state = TimerState::Running;

        self.heaps[bank].heap_push(i, QueueCtx::new(pool, bank));
    }

    /// Remove the timer `i` from the queue if it's there.
    pub(crate) fn remove(&mut self, pool: &mut TimerPool<N>, i: usize) {
        let Some(HeapLink { bank, pos }) = pool[i].link.take() else {
            return;
        };

        let removed = self.heaps[bank].heap_remove(pos, QueueCtx::new(pool, bank));
        debug_assert_eq!(removed, Some(i));

        self.complete_wrap();
    }

    /// Remove and return a timer that is due at `now`, if any. The returned
    /// timer's `link` is cleared; its `state` is left unchanged.
    ///
    /// [`Self::observe`] must have been called with `now`.
    pub(crate) fn pop_due(&mut self, pool: &mut TimerPool<N>, now: UTicks) -> Option<usize> {
        let bank = self.current;
        let &root = self.heaps[bank].first()?;
        if !self.wrap_pending && pool[root].expiration > now {
            return None;
        }

        let i = self.heaps[bank].heap_pop(QueueCtx::new(pool, bank));
        debug_assert_eq!(i, Some(root));
        pool[root].link = None;

        self.complete_wrap();

        Some(root)
    }

    /// Get the number of ticks until the timer `i` expires. Returns `0` if the
    /// timer is not in the queue or is overdue.
    pub(crate) fn remaining(&self, pool: &TimerPool<N>, i: usize, now: UTicks) -> UTicks {
        let cb = &pool[i];
        let Some(link) = cb.link else {
            return 0;
        };

        match (link.bank == self.current, self.wrap_pending) {
            // Overdue
            (true, true) => 0,
            // Same epoch as `now`
            (true, false) | (false, true) => cb.expiration.saturating_sub(now),
            // Next epoch
            (false, false) => saturate(cb.expiration as u64 + self.modulus - now as u64),
        }
    }

    /// Get the number of ticks the service task should sleep for after a
    /// drain pass finished at `now`.
    pub(crate) fn sleep_ticks(&self, pool: &TimerPool<N>, now: UTicks, max_timeout: UTicks) -> UTicks {
        let ticks = if let Some(&root) = self.heaps[self.current].first() {
            if self.wrap_pending {
                0
            } else {
                pool[root].expiration.saturating_sub(now)
            }
        } else if !self.heaps[self.future()].is_empty() {
            // Wake up on the next wrap-around to swap the labels
            saturate(self.modulus - now as u64)
        } else {
            max_timeout
        };

        ticks.min(max_timeout)
    }

    /// The total number of armed timers.
    pub(crate) fn len(&self) -> usize {
        self.heaps[0].len() + self.heaps[1].len()
    }

    /// Check the heap property and the consistency of the reverse map.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self, pool: &TimerPool<N>, firing: Option<usize>) {
        assert!(!self.wrap_pending || !self.heaps[self.current].is_empty());

        for (bank, heap) in self.heaps.iter().enumerate() {
            for (pos, &i) in heap.iter().enumerate() {
                assert_eq!(pool[i].link, Some(HeapLink { bank, pos }), "link of {}", i);
                assert_eq!(pool[i].state, TimerState::Running, "state of {}", i);
                assert!((pool[i].expiration as u64) < self.modulus);
                if pos > 0 {
                    let parent = heap[(pos - 1) / 2];
                    assert!(
                        pool[parent].expiration <= pool[i].expiration,
                        "heap property of bank {} at {}",
                        bank,
                        pos
                    );
                }
            }
        }

        let linked = pool.iter().filter(|cb| cb.link.is_some()).count();
        assert_eq!(linked, self.len());

        let running = pool
            .iter()
            .enumerate()
            .filter(|&(i, cb)| cb.state == TimerState::Running && Some(i) != firing)
            .count();
        assert_eq!(running, self.len());
    }
}

fn saturate(x: u64) -> UTicks {
    UTicks::try_from(x).unwrap_or(UTicks::MAX)
}

impl<const N: usize> core::fmt::Debug for TimerQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("current", &self.heaps[self.current])
            .field("future", &self.heaps[self.future()])
            .field("last_tick", &self.last_tick)
            .field("wrap_pending", &self.wrap_pending)
            .finish()
    }
}
