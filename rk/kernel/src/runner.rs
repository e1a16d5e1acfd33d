//! Thread runner: the first code a new thread executes.

use core::mem;

use crate::arch::RunnerHook;

/// Entry point written into every initial stack frame.
///
/// The restore path delivers the four words of the thread's
/// [`EntryDescriptor`](crate::arch::EntryDescriptor) in the argument
/// registers. A missing pre-termination hook arrives as zero.
pub(crate) extern "C" fn thread_runner(
    argument: usize,
    run: usize,
    pre_termination: usize,
    termination: usize,
) -> ! {
    // SAFETY: the stack builder stored these words from valid hook pointers.
    unsafe { run_thread(argument, run, pre_termination, termination) };

    // The termination hook hands the CPU to another thread; a port that
    // briefly resumes us before the switch takes effect parks here.
    loop {
        core::hint::spin_loop();
    }
}

/// Runs the body and both lifecycle hooks in order.
///
/// # Safety
///
/// `run` and `termination` must be addresses of [`RunnerHook`] functions,
/// `pre_termination` likewise or zero.
pub(crate) unsafe fn run_thread(argument: usize, run: usize, pre_termination: usize, termination: usize) {
    // SAFETY: upheld by the caller; `RunnerHook` is pointer sized.
    let run = unsafe { mem::transmute::<usize, RunnerHook>(run) };
    run(argument);

    if pre_termination != 0 {
        // SAFETY: as above.
        let hook = unsafe { mem::transmute::<usize, RunnerHook>(pre_termination) };
        hook(argument);
    }

    // SAFETY: as above.
    let termination = unsafe { mem::transmute::<usize, RunnerHook>(termination) };
    termination(argument);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::arch::{EntryDescriptor, StackFrame};
    use crate::stack::Stack;
    use std::sync::Mutex;
    use std::vec::Vec;

    static TRACE: Mutex<Vec<(&'static str, usize)>> = Mutex::new(Vec::new());

    extern "C" fn body(argument: usize) {
        TRACE.lock().unwrap().push(("run", argument));
    }

    extern "C" fn before_exit(argument: usize) {
        TRACE.lock().unwrap().push(("pre", argument));
    }

    extern "C" fn finish(argument: usize) {
        TRACE.lock().unwrap().push(("term", argument));
    }

    #[test]
    fn test_restored_frame_starts_body_with_argument() {
        let storage = std::boxed::Box::leak(std::vec![0u8; 1024].into_boxed_slice());
        let descriptor = EntryDescriptor {
            argument: 0xfeed,
            run: body,
            pre_termination: Some(before_exit),
            termination: finish,
        };
        let (_stack, sp) = Stack::new(storage, &descriptor);

        let frame = unsafe { StackFrame::at(sp) }.exception;
        assert_eq!(frame.pc, thread_runner as *const () as usize);
        unsafe { run_thread(frame.r0, frame.r1, frame.r2, frame.r3) };

        assert_eq!(
            *TRACE.lock().unwrap(),
            [("run", 0xfeed), ("pre", 0xfeed), ("term", 0xfeed)]
        );
    }
}
