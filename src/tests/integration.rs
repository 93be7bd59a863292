//! Scheduling-policy, timer-pipeline and driver-glue tests.

use core::ptr::NonNull;

use portable_atomic::{AtomicU32, Ordering};

use super::helpers::{with_kernel, with_scheduler_locked};
use crate::console::Receiver;
use crate::errors::Error;
use crate::thread::{self, testing::make_thread, RunQueue, Thread};
use crate::{irq, timer};
use crate::timer::Timer;

use std::boxed::Box;

fn leak_thread(name: &str, priority: u8) -> NonNull<Thread> {
    NonNull::from(Box::leak(Box::new(make_thread(name, priority))))
}

mod runq_tests {
    use super::*;

    #[test]
    fn test_priority_order_fifo_within_level() {
        with_kernel(|| {
            with_scheduler_locked(|| {
                let runq = RunQueue::new();
                runq.set_current(leak_thread("boot", 0));
                runq.set_idle(leak_thread("idle", 0));

                let a = leak_thread("a", 5);
                let b = leak_thread("b", 5);
                let c = leak_thread("c", 3);
                let hi = leak_thread("hi", 9);

                runq.add(a);
                runq.add(b);
                runq.add(c);
                runq.add(hi);
                assert_eq!(runq.nr_threads(), 4);

                // Highest priority first; FIFO within a priority.
                assert_eq!(runq.get_next(), hi);
                assert_eq!(runq.get_next(), a);
                assert_eq!(runq.get_next(), b);
                assert_eq!(runq.get_next(), c);
                assert_eq!(runq.nr_threads(), 0);

                // Nothing queued: the idle thread takes over.
                let idle = runq.get_next();
                assert_eq!(idle.as_ptr(), runq.current().as_ptr());
            });
        });
    }

    #[test]
    fn test_add_requests_yield_from_lower_priority_current() {
        with_kernel(|| {
            with_scheduler_locked(|| {
                let runq = RunQueue::new();
                let boot = leak_thread("boot", 3);
                runq.set_current(boot);

                runq.add(leak_thread("low", 2));
                assert!(!unsafe { boot.as_ref() }.should_yield());

                runq.add(leak_thread("peer", 3));
                assert!(!unsafe { boot.as_ref() }.should_yield());

                runq.add(leak_thread("high", 7));
                assert!(unsafe { boot.as_ref() }.should_yield());
            });
        });
    }

    #[test]
    fn test_schedule_round_robin_and_sleep() {
        with_kernel(|| {
            with_scheduler_locked(|| {
                let runq = RunQueue::new();
                let idle = leak_thread("idle", 0);
                runq.set_idle(idle);

                let t1 = leak_thread("t1", 4);
                let t2 = leak_thread("t2", 4);
                runq.set_current(t1);
                runq.add(t2);

                // A running thread is requeued at the tail.
                runq.schedule();
                assert_eq!(runq.current(), t2);
                assert_eq!(runq.nr_threads(), 1);

                runq.schedule();
                assert_eq!(runq.current(), t1);

                // A sleeping thread is not requeued.
                unsafe { t1.as_ref() }.set_sleeping();
                runq.schedule();
                assert_eq!(runq.current(), t2);
                assert_eq!(runq.nr_threads(), 0);

                // When the last runnable thread sleeps, idle runs.
                unsafe { t2.as_ref() }.set_sleeping();
                runq.schedule();
                assert_eq!(runq.current(), idle);

                // A wakeup puts a sleeper back; idle is preempted.
                unsafe { t1.as_ref() }.set_running();
                runq.add(t1);
                assert!(unsafe { idle.as_ref() }.should_yield());
                runq.schedule();
                assert_eq!(runq.current(), t1);
            });
        });
    }

    #[test]
    fn test_higher_priority_finishes_first() {
        with_kernel(|| {
            with_scheduler_locked(|| {
                let runq = RunQueue::new();
                runq.set_idle(leak_thread("idle", 0));

                let boot = leak_thread("boot", 0);
                runq.set_current(boot);

                let t5 = leak_thread("t5", 5);
                let t3 = leak_thread("t3", 3);
                runq.add(t5);
                runq.add(t3);

                unsafe { boot.as_ref() }.set_sleeping();
                runq.schedule();
                assert_eq!(runq.current(), t5);

                // As long as t5 stays runnable, t3 never runs.
                runq.schedule();
                assert_eq!(runq.current(), t5);

                unsafe { t5.as_ref() }.set_sleeping();
                runq.schedule();
                assert_eq!(runq.current(), t3);
            });
        });
    }
}

mod timer_tests {
    use super::*;

    fn count_callback(arg: *mut ()) {
        let counter = unsafe { &*(arg as *const AtomicU32) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn tick() {
        with_scheduler_locked(thread::report_tick);
    }

    #[test]
    fn test_fires_once_at_deadline() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        static TIMER: Timer =
            Timer::new(count_callback, &FIRED as *const AtomicU32 as *mut ());

        with_kernel(|| {
            let start = timer::now();
            TIMER.schedule(start.wrapping_add(3));
            assert_eq!(TIMER.time(), start.wrapping_add(3));

            // Not due yet: a drain pass runs nothing.
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 0);

            tick();
            tick();
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 0);

            tick();
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 1);

            // Dispatch unlinked the timer: it can be scheduled again.
            TIMER.schedule(timer::now().wrapping_add(1));
            tick();
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_dispatch_in_deadline_order() {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        static AT_A: AtomicU32 = AtomicU32::new(0);
        static AT_B: AtomicU32 = AtomicU32::new(0);
        static AT_C: AtomicU32 = AtomicU32::new(0);

        fn record(arg: *mut ()) {
            let slot = unsafe { &*(arg as *const AtomicU32) };
            slot.store(SEQ.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
        }

        static TIMER_A: Timer = Timer::new(record, &AT_A as *const AtomicU32 as *mut ());
        static TIMER_B: Timer = Timer::new(record, &AT_B as *const AtomicU32 as *mut ());
        static TIMER_C: Timer = Timer::new(record, &AT_C as *const AtomicU32 as *mut ());

        with_kernel(|| {
            let start = timer::now();

            // Scheduled out of deadline order on purpose.
            TIMER_B.schedule(start.wrapping_add(5));
            TIMER_C.schedule(start.wrapping_add(8));
            TIMER_A.schedule(start.wrapping_add(2));

            for _ in 0..10 {
                tick();
            }

            timer::process_list(timer::now());

            let (a, b, c) = (
                AT_A.load(Ordering::SeqCst),
                AT_B.load(Ordering::SeqCst),
                AT_C.load(Ordering::SeqCst),
            );
            assert!(a != 0 && b != 0 && c != 0);
            assert!(a < b && b < c);
        });
    }

    #[test]
    fn test_periodic_reschedule_from_callback() {
        static COUNT: AtomicU32 = AtomicU32::new(0);
        static PERIODIC: Timer = Timer::new(periodic_callback, core::ptr::null_mut());

        fn periodic_callback(_arg: *mut ()) {
            if COUNT.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                PERIODIC.schedule(timer::now().wrapping_add(2));
            }
        }

        with_kernel(|| {
            PERIODIC.schedule(timer::now().wrapping_add(2));

            let mut ticks = 0;
            while COUNT.load(Ordering::SeqCst) < 3 {
                tick();
                timer::process_list(timer::now());
                ticks += 1;
                assert!(ticks < 20, "periodic timer failed to make progress");
            }

            // Three firings, two ticks apart each.
            assert_eq!(ticks, 6);
        });
    }

    #[test]
    fn test_wrap_safe_deadline_across_overflow() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        static TIMER: Timer =
            Timer::new(count_callback, &FIRED as *const AtomicU32 as *mut ());

        with_kernel(|| {
            with_scheduler_locked(|| timer::testing::set_ticks(u32::MAX - 10));

            let start = timer::now();
            let deadline = start.wrapping_add((1 << 31) - 1);
            TIMER.schedule(deadline);

            // Half the range ahead is still the future.
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 0);

            // Jump the clock past the deadline, across the wrap.
            with_scheduler_locked(|| timer::testing::set_ticks(deadline.wrapping_add(1)));
            tick();
            timer::process_list(timer::now());
            assert_eq!(FIRED.load(Ordering::SeqCst), 1);
        });
    }
}

mod console_tests {
    use super::*;

    #[test]
    fn test_receiver_queues_and_reads() {
        static RX: Receiver<8> = Receiver::new();

        with_kernel(|| {
            with_scheduler_locked(|| {
                RX.isr_push(b'x').unwrap();
                RX.isr_push(b'y').unwrap();
            });

            assert_eq!(RX.read().unwrap(), b'x');
            assert_eq!(RX.read().unwrap(), b'y');
        });
    }

    #[test]
    fn test_receiver_reports_overrun() {
        static RX: Receiver<4> = Receiver::new();

        with_kernel(|| {
            with_scheduler_locked(|| {
                for byte in 0..4 {
                    RX.isr_push(byte).unwrap();
                }

                assert_eq!(RX.isr_push(9), Err(Error::Busy));
            });

            for byte in 0..4 {
                assert_eq!(RX.read().unwrap(), byte);
            }
        });
    }
}

mod irq_tests {
    use super::*;

    struct TestController {
        enabled: AtomicU32,
    }

    impl irq::IrqController for TestController {
        fn enable(&self, irq: u32) {
            self.enabled.fetch_or(1 << irq, Ordering::SeqCst);
        }

        fn disable(&self, irq: u32) {
            self.enabled.fetch_and(!(1 << irq), Ordering::SeqCst);
        }
    }

    static CONTROLLER: TestController = TestController {
        enabled: AtomicU32::new(0),
    };

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn handler(arg: *mut ()) {
        let hits = unsafe { &*(arg as *const AtomicU32) };
        hits.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_register_and_dispatch() {
        with_kernel(|| {
            irq::set_controller(&CONTROLLER);

            let out_of_range = crate::config::NR_IRQS as u32;
            assert_eq!(
                irq::register(out_of_range, handler, core::ptr::null_mut()),
                Err(Error::InvalidArgument)
            );

            irq::register(7, handler, &HITS as *const AtomicU32 as *mut ()).unwrap();
            assert_eq!(CONTROLLER.enabled.load(Ordering::SeqCst) & (1 << 7), 1 << 7);

            with_scheduler_locked(|| irq::dispatch(7));
            with_scheduler_locked(|| irq::dispatch(7));
            assert_eq!(HITS.load(Ordering::SeqCst), 2);
        });
    }
}
