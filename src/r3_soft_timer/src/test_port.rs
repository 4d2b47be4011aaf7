//! A port for unit tests. Each test defines its own port type with
//! [`test_port!`], so tests don't share any state.
//!
//! The tick counter only moves when a test tells it to, and the service task
//! is never actually started; tests call [`TimerService::run_once`] directly.
//!
//! [`TimerService::run_once`]: crate::TimerService::run_once
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Mutex,
};

use crate::{InstallTaskError, Port, UTicks};

/// A record of a call to [`PortService::install_task`]. The entry point is
/// not recorded because the test port never runs the service task.
///
/// [`PortService::install_task`]: crate::PortService::install_task
#[derive(Debug, Clone, Copy)]
pub(crate) struct InstalledTask {
    pub(crate) param: usize,
    pub(crate) name: &'static str,
    pub(crate) stack_size: usize,
    pub(crate) priority: usize,
}

/// The state of a port type defined by [`test_port!`].
pub(crate) struct TestPortState {
    cpu_lock: AtomicBool,
    tick: AtomicU32,
    pended: Mutex<Vec<UTicks>>,
    installed: Mutex<Vec<InstalledTask>>,
    fail_install: AtomicBool,
}

impl TestPortState {
    pub(crate) const fn new() -> Self {
        Self {
            cpu_lock: AtomicBool::new(false),
            tick: AtomicU32::new(0),
            pended: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            fail_install: AtomicBool::new(false),
        }
    }

    pub(crate) fn enter_cpu_lock(&self) {
        assert!(
            !self.cpu_lock.swap(true, Ordering::Relaxed),
            "CPU Lock is already active"
        );
    }

    pub(crate) fn leave_cpu_lock(&self) {
        assert!(
            self.cpu_lock.swap(false, Ordering::Relaxed),
            "CPU Lock is not active"
        );
    }

    pub(crate) fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.load(Ordering::Relaxed)
    }

    pub(crate) fn tick_count(&self) -> UTicks {
        assert!(self.is_cpu_lock_active(), "tick count read outside CPU Lock");
        self.tick.load(Ordering::Relaxed)
    }

    pub(crate) fn install_task(&self, task: InstalledTask) -> Result<(), InstallTaskError> {
        if self.fail_install.load(Ordering::Relaxed) {
            return Err(InstallTaskError::BadObjectState);
        }
        self.installed.lock().unwrap().push(task);
        Ok(())
    }

    pub(crate) fn pend_service_after(&self, ticks: UTicks) {
        assert!(self.is_cpu_lock_active());
        log::trace!("pend_service_after({})", ticks);
        self.pended.lock().unwrap().push(ticks);
    }
}

/// Test-only accessors of a port type defined by [`test_port!`].
pub(crate) trait TestPort: Port {
    fn port() -> &'static TestPortState;

    /// Get the current tick count.
    fn now() -> UTicks {
        Self::port().tick.load(Ordering::Relaxed)
    }

    fn set_now(tick: UTicks) {
        assert!(tick <= Self::MAX_TICK_COUNT);
        Self::port().tick.store(tick, Ordering::Relaxed);
    }

    /// Advance the tick count by `ticks`, wrapping around after
    /// `MAX_TICK_COUNT`.
    fn advance(ticks: UTicks) {
        let modulus = Self::MAX_TICK_COUNT as u64 + 1;
        let tick = (Self::now() as u64 + ticks as u64) % modulus;
        Self::set_now(tick as UTicks);
    }

    /// Take the values passed to `pend_service_after` so far.
    fn take_pended() -> Vec<UTicks> {
        std::mem::take(&mut *Self::port().pended.lock().unwrap())
    }

    fn installed_tasks() -> Vec<InstalledTask> {
        Self::port().installed.lock().unwrap().clone()
    }

    fn fail_install_task() {
        Self::port().fail_install.store(true, Ordering::Relaxed);
    }
}

/// Define a port type for a test.
///
/// ```rust,ignore
/// test_port!(struct Traits, max_tick_count = 999, max_timeout = 5000);
/// ```
macro_rules! test_port {
    (
        $vis:vis struct $Traits:ident,
        max_tick_count = $max_tick_count:expr,
        max_timeout = $max_timeout:expr $(,)?
    ) => {
        $vis struct $Traits;

        const _: () = {
            use $crate::{
                test_port::{InstalledTask, TestPort, TestPortState},
                InstallTaskError, PortService, PortThreading, PortTimer, UTicks,
            };

            static STATE: TestPortState = TestPortState::new();

            impl TestPort for $Traits {
                fn port() -> &'static TestPortState {
                    &STATE
                }
            }

            unsafe impl PortThreading for $Traits {
                unsafe fn enter_cpu_lock() {
                    STATE.enter_cpu_lock();
                }

                unsafe fn leave_cpu_lock() {
                    STATE.leave_cpu_lock();
                }

                fn is_cpu_lock_active() -> bool {
                    STATE.is_cpu_lock_active()
                }
            }

            impl PortTimer for $Traits {
                const MAX_TICK_COUNT: UTicks = $max_tick_count;
                const MAX_TIMEOUT: UTicks = $max_timeout;

                unsafe fn tick_count() -> UTicks {
                    STATE.tick_count()
                }
            }

            unsafe impl PortService for $Traits {
                fn install_task(
                    _entry: fn(usize),
                    param: usize,
                    name: &'static str,
                    stack_size: usize,
                    priority: usize,
                ) -> Result<(), InstallTaskError> {
                    STATE.install_task(InstalledTask {
                        param,
                        name,
                        stack_size,
                        priority,
                    })
                }

                unsafe fn service_sleep(_ticks: UTicks) {
                    panic!("the test port doesn't run the service task");
                }

                unsafe fn pend_service_after(ticks: UTicks) {
                    STATE.pend_service_after(ticks);
                }
            }
        };
    };
}
