//! Blocking FIFO behavior between kernel threads and interrupt context.

mod common;

use std::thread;
use std::time::Duration;

use common::{boot, events, share, shared, stack, start, storage, wait_for_state, Events, WAIT};
use rk_kernel::{
    DynamicFifoQueue, FifoQueue, KernelConfig, Priority, RkError, RkResult, ThreadConfig, ThreadState, TickDuration,
};
use rk_posix::Ticker;

struct Named {
    fifo: FifoQueue<u32>,
    events: Events<(&'static str, u32)>,
}

fn pop_once(name: &'static str, argument: usize) {
    let named: &Named = unsafe { shared(argument) };
    let value = named.fifo.pop();
    named.events.send((name, value));
}

fn first(argument: usize) {
    pop_once("first", argument);
}

fn second(argument: usize) {
    pop_once("second", argument);
}

#[test]
fn each_push_wakes_one_consumer_in_arrival_order() {
    let (kernel, _) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(Named {
        fifo: FifoQueue::new(kernel, storage(4)).unwrap(),
        events: log,
    });
    let fifo = &unsafe { shared::<Named>(argument) }.fifo;

    let priority = Priority::new(3).unwrap();
    let a = kernel.spawn(ThreadConfig::new(priority, stack(), first).with_argument(argument)).unwrap();
    let b = kernel.spawn(ThreadConfig::new(priority, stack(), second).with_argument(argument)).unwrap();
    start(kernel);
    wait_for_state(kernel, a, ThreadState::Blocked);
    wait_for_state(kernel, b, ThreadState::Blocked);

    fifo.try_push(1).unwrap();
    assert_eq!(received.recv_timeout(WAIT).unwrap(), ("first", 1));
    assert!(received.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(kernel.thread_state(b), Some(ThreadState::Blocked));

    fifo.try_push(2).unwrap();
    assert_eq!(received.recv_timeout(WAIT).unwrap(), ("second", 2));
}

fn low_consumer(argument: usize) {
    pop_once("low", argument);
}

fn high_consumer(argument: usize) {
    pop_once("high", argument);
}

#[test]
fn waiting_consumers_are_served_by_priority() {
    let (kernel, _) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(Named {
        fifo: FifoQueue::new(kernel, storage(4)).unwrap(),
        events: log,
    });
    let fifo = &unsafe { shared::<Named>(argument) }.fifo;

    let low = kernel
        .spawn(ThreadConfig::new(Priority::new(2).unwrap(), stack(), low_consumer).with_argument(argument))
        .unwrap();
    start(kernel);
    wait_for_state(kernel, low, ThreadState::Blocked);

    // Arrives later but outranks the first waiter.
    let high = kernel
        .spawn(ThreadConfig::new(Priority::new(6).unwrap(), stack(), high_consumer).with_argument(argument))
        .unwrap();
    wait_for_state(kernel, high, ThreadState::Blocked);

    fifo.try_push(1).unwrap();
    assert_eq!(received.recv_timeout(WAIT).unwrap(), ("high", 1));
    fifo.try_push(2).unwrap();
    assert_eq!(received.recv_timeout(WAIT).unwrap(), ("low", 2));
}

struct Producer {
    fifo: FifoQueue<u32>,
    events: Events<&'static str>,
}

fn producer(argument: usize) {
    let producer: &Producer = unsafe { shared(argument) };
    producer.fifo.push(1);
    producer.fifo.emplace(|| 2);
    producer.events.send("pushed both");
}

#[test]
fn push_to_full_queue_waits_for_space() {
    let (kernel, _) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(Producer {
        fifo: FifoQueue::new(kernel, storage(1)).unwrap(),
        events: log,
    });
    let fifo = &unsafe { shared::<Producer>(argument) }.fifo;

    let id = kernel
        .spawn(ThreadConfig::new(Priority::new(3).unwrap(), stack(), producer).with_argument(argument))
        .unwrap();
    start(kernel);
    wait_for_state(kernel, id, ThreadState::Blocked);

    assert!(fifo.is_full());
    assert!(received.try_recv().is_err());

    assert_eq!(fifo.try_pop(), Ok(1));
    assert_eq!(received.recv_timeout(WAIT).unwrap(), "pushed both");
    assert_eq!(fifo.try_pop(), Ok(2));
    assert!(fifo.is_empty());
}

struct Timed {
    kernel: &'static rk_kernel::Kernel,
    fifo: FifoQueue<u32>,
    events: Events<(RkResult<u32>, u32)>,
}

fn timed_consumer(argument: usize) {
    let timed: &Timed = unsafe { shared(argument) };
    let before = timed.kernel.tick_count();
    let result = timed.fifo.try_pop_for(TickDuration::from_ticks(3));
    let elapsed = timed.kernel.tick_count().elapsed_since(before);
    timed.events.send((result, elapsed));
}

#[test]
fn timed_pop_on_empty_queue_times_out() {
    let (kernel, port) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(Timed {
        kernel,
        fifo: FifoQueue::new(kernel, storage(1)).unwrap(),
        events: log,
    });

    kernel
        .spawn(ThreadConfig::new(Priority::new(3).unwrap(), stack(), timed_consumer).with_argument(argument))
        .unwrap();
    let ticker = Ticker::start(kernel, port);
    start(kernel);

    let (result, elapsed) = received.recv_timeout(WAIT).unwrap();
    ticker.stop();
    assert_eq!(result, Err(RkError::Timeout));
    assert!(elapsed >= 3, "gave up after {elapsed} ticks");
}

struct TimedProducer {
    kernel: &'static rk_kernel::Kernel,
    fifo: FifoQueue<u32>,
    events: Events<(RkError, u32, u32)>,
}

fn timed_producer(argument: usize) {
    let timed: &TimedProducer = unsafe { shared(argument) };
    timed.fifo.push(7);
    let before = timed.kernel.tick_count();
    let Err(error) = timed.fifo.try_push_for(TickDuration::from_ticks(3), 8) else {
        panic!("pushed into a full queue");
    };
    let elapsed = timed.kernel.tick_count().elapsed_since(before);
    timed.events.send((error.kind(), elapsed, error.into_inner()));
}

#[test]
fn timed_push_on_full_queue_times_out() {
    let (kernel, port) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(TimedProducer {
        kernel,
        fifo: FifoQueue::new(kernel, storage(1)).unwrap(),
        events: log,
    });
    let fifo = &unsafe { shared::<TimedProducer>(argument) }.fifo;

    kernel
        .spawn(ThreadConfig::new(Priority::new(3).unwrap(), stack(), timed_producer).with_argument(argument))
        .unwrap();
    let ticker = Ticker::start(kernel, port);
    start(kernel);

    let (kind, elapsed, rejected) = received.recv_timeout(WAIT).unwrap();
    ticker.stop();
    assert_eq!(kind, RkError::Timeout);
    assert!(elapsed >= 3, "gave up after {elapsed} ticks");
    assert_eq!(rejected, 8);
    assert_eq!(fifo.try_pop(), Ok(7));
}

struct Summer {
    fifo: DynamicFifoQueue<u32>,
    events: Events<u32>,
}

fn summer(argument: usize) {
    let summer: &Summer = unsafe { shared(argument) };
    let total = (0..5).map(|_| summer.fifo.pop()).sum();
    summer.events.send(total);
}

#[test]
fn interrupt_context_feeds_a_heap_queue() {
    let (kernel, _) = boot(KernelConfig::default());
    let (log, received) = events();
    let argument = share(Summer {
        fifo: DynamicFifoQueue::new(kernel, 2).unwrap(),
        events: log,
    });
    let fifo = &unsafe { shared::<Summer>(argument) }.fifo;

    kernel
        .spawn(ThreadConfig::new(Priority::new(5).unwrap(), stack(), summer).with_argument(argument))
        .unwrap();
    start(kernel);

    for value in 1..=5 {
        // Interrupt handlers never block: retry until the consumer drains.
        while fifo.try_push(value).is_err() {
            thread::sleep(Duration::from_millis(1));
        }
    }
    assert_eq!(received.recv_timeout(WAIT).unwrap(), 15);
    assert_eq!(fifo.try_pop(), Err(RkError::WouldBlock));
}
