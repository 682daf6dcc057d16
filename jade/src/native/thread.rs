use std::time::Duration;

use crate::{eval::INTERRUPTED_EXCEPTION, monitor::MonitorError};

use super::{NativeCall, NativeMethods, NativeResult, ILLEGAL_ARGUMENT_EXCEPTION};

pub(super) fn register(natives: &NativeMethods) {
    natives.register("java/lang/Thread.sleep(J)V", thread_sleep);
    natives.register("java/lang/Thread.interrupted()Z", thread_interrupted);
    natives.register("java/lang/Thread.yield()V", thread_yield);
}

fn thread_sleep(mut call: NativeCall<'_>) -> NativeResult {
    let millis = call.long_arg()?;
    let millis = match u64::try_from(millis) {
        Ok(millis) => millis,
        Err(_) => {
            return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("timeout value is negative"))
        }
    };

    match call.thread.handle().sleep(Duration::from_millis(millis)) {
        Ok(()) => call.ret_void(),
        Err(MonitorError::Interrupted) => call.throw(INTERRUPTED_EXCEPTION, Some("sleep interrupted")),
        Err(err) => super::object::monitor_error(call, err),
    }
}

/// Get and clear the interrupt flag of the calling thread
fn thread_interrupted(call: NativeCall<'_>) -> NativeResult {
    let interrupted = call.thread.handle().take_interrupt();
    call.ret(interrupted)
}

fn thread_yield(call: NativeCall<'_>) -> NativeResult {
    std::thread::yield_now();
    call.ret_void()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::{
        eval::{testing, INTERRUPTED_EXCEPTION},
        rv::RuntimeValue,
    };

    #[test]
    fn test_sleep() {
        let runtime = testing::runtime(Vec::new());
        let thread_class = runtime.loader().load_class("java/lang/Thread").unwrap();
        let sleep = testing::method(&thread_class, "sleep", "(J)V");
        let interrupted = testing::method(&thread_class, "interrupted", "()Z");
        let mut thread = runtime.new_thread("main");

        let start = Instant::now();
        let result = thread.invoke(&sleep, &[RuntimeValue::Long(5)]);
        assert_eq!(testing::returned(result), None);
        assert!(start.elapsed() >= Duration::from_millis(5));

        // An interrupt that is already pending stops the sleep right away, and is consumed
        thread.handle().interrupt();
        let result = thread.invoke(&sleep, &[RuntimeValue::Long(60_000)]);
        assert_eq!(testing::thrown_class(result), INTERRUPTED_EXCEPTION);
        assert!(!thread.handle().is_interrupted());

        thread.handle().interrupt();
        let result = thread.invoke(&interrupted, &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));
        let result = thread.invoke(&interrupted, &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(0)));
    }
}
