//! Shared scaffolding for the hosted kernel tests.

#![allow(dead_code)]

use std::mem::MaybeUninit;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use rk_kernel::{Kernel, KernelConfig, RkError, ThreadId, ThreadState};
use rk_posix::PosixPort;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(2);

pub fn boot(config: KernelConfig) -> (&'static Kernel, &'static PosixPort) {
    let port: &'static PosixPort = Box::leak(Box::default());
    let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(port, config)));
    (kernel, port)
}

pub fn stack() -> &'static mut [u8] {
    Box::leak(vec![0u8; 4096].into_boxed_slice())
}

pub fn storage<T>(capacity: usize) -> &'static mut [MaybeUninit<T>] {
    Box::leak((0..capacity).map(|_| MaybeUninit::uninit()).collect())
}

/// Starts the kernel on its own OS thread, which becomes the simulated CPU.
pub fn start(kernel: &'static Kernel) {
    let idle = stack();
    thread::spawn(move || {
        kernel.start(idle);
    });
}

/// Leaks `value` and returns its address as a thread argument.
pub fn share<T: Sync>(value: T) -> usize {
    Box::leak(Box::new(value)) as *const T as usize
}

/// # Safety
///
/// `argument` must come from [`share`] with the same `T`.
pub unsafe fn shared<T>(argument: usize) -> &'static T {
    unsafe { &*(argument as *const T) }
}

/// Channel sender usable from any kernel thread.
pub struct Events<T> {
    sender: Mutex<Sender<T>>,
}

impl<T> Events<T> {
    pub fn send(&self, event: T) {
        let _ = self.sender.lock().unwrap().send(event);
    }
}

pub fn events<T>() -> (Events<T>, Receiver<T>) {
    let (sender, receiver) = mpsc::channel();
    (Events { sender: Mutex::new(sender) }, receiver)
}

pub fn wait_for_state(kernel: &Kernel, id: ThreadId, state: ThreadState) {
    let deadline = Instant::now() + WAIT;
    while kernel.thread_state(id) != Some(state) {
        assert!(Instant::now() < deadline, "{id} never became {state}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Reaps `id` once it has terminated and been switched away from.
pub fn reap(kernel: &Kernel, id: ThreadId) -> &'static mut [u8] {
    let deadline = Instant::now() + WAIT;
    loop {
        match kernel.reap(id) {
            Ok(storage) => return storage,
            Err(RkError::NotTerminated | RkError::InvalidState) => {
                assert!(Instant::now() < deadline, "{id} never terminated");
                thread::sleep(Duration::from_millis(1));
            }
            Err(error) => panic!("reaping {id}: {error}"),
        }
    }
}
