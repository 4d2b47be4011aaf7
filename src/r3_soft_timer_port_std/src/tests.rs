use r3_soft_timer::{InstallTaskError, PortService, PortThreading, PortTimer};
use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use super::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

use_port!(unsafe struct LockTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn cpu_lock() {
    init_logger();
    assert!(!LockTraits::is_cpu_lock_active());

    unsafe { LockTraits::enter_cpu_lock() };
    assert!(LockTraits::is_cpu_lock_active());
    assert!(!unsafe { LockTraits::try_enter_cpu_lock() });
    unsafe { LockTraits::leave_cpu_lock() };
    assert!(!LockTraits::is_cpu_lock_active());

    assert!(unsafe { LockTraits::try_enter_cpu_lock() });
    assert!(LockTraits::is_cpu_lock_active());
    unsafe { LockTraits::leave_cpu_lock() };
}

use_port!(unsafe struct ExclusionTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn cpu_lock_excludes_other_threads() {
    init_logger();
    static ENTERED: AtomicBool = AtomicBool::new(false);

    unsafe { ExclusionTraits::enter_cpu_lock() };

    let other = thread::spawn(|| {
        // CPU Lock is per thread
        assert!(!ExclusionTraits::is_cpu_lock_active());
        unsafe { ExclusionTraits::enter_cpu_lock() };
        ENTERED.store(true, Ordering::SeqCst);
        unsafe { ExclusionTraits::leave_cpu_lock() };
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!ENTERED.load(Ordering::SeqCst));

    unsafe { ExclusionTraits::leave_cpu_lock() };
    other.join().unwrap();
    assert!(ENTERED.load(Ordering::SeqCst));
}

use_port!(unsafe struct ClockTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn tick_count_wraps_around() {
    init_logger();
    let read = || unsafe {
        ClockTraits::enter_cpu_lock();
        let now = ClockTraits::tick_count();
        ClockTraits::leave_cpu_lock();
        now
    };

    assert_eq!(read(), 0);
    advance_ticks::<ClockTraits>(99);
    assert_eq!(read(), 99);
    advance_ticks::<ClockTraits>(1);
    assert_eq!(read(), 0);
    advance_ticks::<ClockTraits>(150);
    assert_eq!(read(), 50);
    assert_eq!(ticks::<ClockTraits>(), 250);
}

use_port!(unsafe struct ReduceTraits, max_tick_count = 99, max_timeout = 10);

#[quickcheck_macros::quickcheck]
fn tick_count_is_reduced(steps: Vec<u16>) -> bool {
    steps.into_iter().all(|step| {
        advance_ticks::<ReduceTraits>(step.into());
        let now = unsafe {
            ReduceTraits::enter_cpu_lock();
            let now = ReduceTraits::tick_count();
            ReduceTraits::leave_cpu_lock();
            now
        };
        u64::from(now) == ticks::<ReduceTraits>() % 100
    })
}

use_port!(unsafe struct DefaultTraits);

#[test]
fn default_constants() {
    assert_eq!(DefaultTraits::MAX_TICK_COUNT, UTicks::MAX);
    assert_eq!(DefaultTraits::MAX_TIMEOUT, UTicks::MAX / 2);
}

use_port!(unsafe struct PendTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn wake_up_pended_before_sleep() {
    init_logger();
    let state = PendTraits::port_state();

    unsafe {
        PendTraits::enter_cpu_lock();
        PendTraits::pend_service_after(5);
        PendTraits::pend_service_after(3);
        PendTraits::pend_service_after(8);
        PendTraits::leave_cpu_lock();
    }

    let sleeper = thread::spawn(|| unsafe { PendTraits::service_sleep(100) });

    wait_for_service_idle::<PendTraits>();
    assert_eq!(state.lock_clock().wake_at, Some(3));
    assert_eq!(state.lock_clock().pended, None);

    advance_ticks::<PendTraits>(3);
    sleeper.join().unwrap();
    assert_eq!(state.lock_clock().wake_at, None);
}

use_port!(unsafe struct WakeTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn wake_up_pended_while_sleeping() {
    init_logger();
    let state = WakeTraits::port_state();

    let sleeper = thread::spawn(|| unsafe { WakeTraits::service_sleep(100) });
    wait_for_service_idle::<WakeTraits>();
    assert_eq!(state.lock_clock().wake_at, Some(100));

    unsafe {
        WakeTraits::enter_cpu_lock();
        WakeTraits::pend_service_after(5);
        WakeTraits::pend_service_after(20);
        WakeTraits::leave_cpu_lock();
    }
    assert_eq!(state.lock_clock().wake_at, Some(5));

    advance_ticks::<WakeTraits>(4);
    wait_for_service_idle::<WakeTraits>();

    advance_ticks::<WakeTraits>(1);
    sleeper.join().unwrap();
    assert_eq!(ticks::<WakeTraits>(), 5);
}

use_port!(unsafe struct InstallTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn install_task() {
    init_logger();
    static PARAM: AtomicUsize = AtomicUsize::new(0);

    fn entry(param: usize) {
        assert_eq!(thread::current().name(), Some("test task"));
        PARAM.store(param, Ordering::SeqCst);
    }

    assert_eq!(
        InstallTraits::install_task(entry, 42, "test task", 0, 1),
        Err(InstallTaskError::BadParam)
    );
    assert_eq!(
        InstallTraits::install_task(entry, 42, "test task", 0x1000, 1),
        Ok(())
    );
    assert_eq!(
        InstallTraits::install_task(entry, 43, "test task", 0x1000, 1),
        Err(InstallTaskError::BadObjectState)
    );

    let deadline = Instant::now() + Duration::from_secs(10);
    while PARAM.load(Ordering::SeqCst) != 42 {
        assert!(Instant::now() < deadline, "the task didn't start");
        thread::sleep(Duration::from_millis(1));
    }
}

use_port!(unsafe struct TickerTraits, max_tick_count = 99, max_timeout = 10);

#[test]
fn ticker() {
    init_logger();
    let ticker = start_ticker::<TickerTraits>(Duration::from_millis(1));

    let deadline = Instant::now() + Duration::from_secs(10);
    while ticks::<TickerTraits>() < 5 {
        assert!(Instant::now() < deadline, "the ticker didn't advance the clock");
        thread::sleep(Duration::from_millis(1));
    }

    drop(ticker);
    let stopped_at = ticks::<TickerTraits>();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(ticks::<TickerTraits>(), stopped_at);
}
