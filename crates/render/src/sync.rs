//! Handshakes between the thread that owns the GPU context and the threads
//! that ask it for frames.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::RenderError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on `condvar` until `done` holds or `timeout` elapses. Returns the
/// final value of `done`.
fn wait_until<T>(
    mutex: &Mutex<T>,
    condvar: &Condvar,
    timeout: Duration,
    done: impl Fn(&T) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut guard = lock(mutex);
    while !done(&guard) {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        guard = condvar
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
    true
}

/// Set once the render context exists and its resources are built.
///
/// Redraw callbacks that arrive before that are ignored; callers that need
/// the context block in [`ContextGate::wait_ready`].
#[derive(Debug, Clone, Default)]
pub struct ContextGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ContextGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        let (ready, condvar) = &*self.inner;
        *lock(ready) = true;
        condvar.notify_all();
        debug!("render context ready");
    }

    pub fn is_ready(&self) -> bool {
        *lock(&self.inner.0)
    }

    pub fn wait_ready(&self, timeout: Duration) -> Result<(), RenderError> {
        let (ready, condvar) = &*self.inner;
        if wait_until(ready, condvar, timeout, |r| *r) {
            Ok(())
        } else {
            warn!(?timeout, "render context did not become ready");
            Err(RenderError::ContextTimeout(timeout))
        }
    }
}

/// The "frame requested" flag of a synchronous frame submission.
///
/// The submitting thread raises the flag, pokes the windowing layer to
/// redraw and blocks until the render thread lowers the flag again.
#[derive(Debug, Clone, Default)]
pub struct FrameSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        *lock(&self.inner.0) = true;
    }

    pub fn is_requested(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Lower the flag and wake the waiting submitter.
    pub fn complete(&self) {
        let (requested, condvar) = &*self.inner;
        *lock(requested) = false;
        condvar.notify_all();
    }

    /// Block until the current request has been completed.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let (requested, condvar) = &*self.inner;
        wait_until(requested, condvar, timeout, |r| !*r)
    }

    /// Raise the flag, run `trigger` (usually a redraw request) and wait for
    /// the render thread to finish the frame.
    pub fn request_and_wait(
        &self,
        trigger: impl FnOnce(),
        timeout: Duration,
    ) -> Result<(), RenderError> {
        self.request();
        trigger();
        if self.wait_complete(timeout) {
            Ok(())
        } else {
            Err(RenderError::FrameTimeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn gate_times_out_when_never_ready() {
        let gate = ContextGate::new();
        assert!(!gate.is_ready());
        let err = gate.wait_ready(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, RenderError::ContextTimeout(_)));
    }

    #[test]
    fn gate_opens_from_another_thread() {
        let gate = ContextGate::new();
        let remote = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.mark_ready();
        });
        gate.wait_ready(Duration::from_secs(5)).unwrap();
        assert!(gate.is_ready());
        handle.join().unwrap();
    }

    #[test]
    fn frame_request_blocks_until_completed() {
        let signal = FrameSignal::new();
        let render_side = signal.clone();
        let handle = thread::spawn(move || {
            while !render_side.is_requested() {
                thread::sleep(Duration::from_millis(1));
            }
            render_side.complete();
        });
        signal
            .request_and_wait(|| {}, Duration::from_secs(5))
            .unwrap();
        assert!(!signal.is_requested());
        handle.join().unwrap();
    }

    #[test]
    fn frame_request_times_out_without_renderer() {
        let signal = FrameSignal::new();
        let mut triggered = false;
        let result = signal.request_and_wait(|| triggered = true, Duration::from_millis(10));
        assert!(triggered);
        assert!(matches!(result, Err(RenderError::FrameTimeout(_))));
        assert!(signal.is_requested());
    }
}
