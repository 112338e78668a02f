//! Wait/notify on a published position counter.
//!
//! Each counter is paired with a 32-bit wake word that is bumped after every
//! publish. A waiter snapshots the wake word *before* comparing the counter
//! against its cached value, then sleeps only while the wake word still holds
//! the snapshot. Any publish that lands between the check and the sleep
//! changes the word, so the sleep returns immediately and no update is lost.
//!
//! On Linux the sleep is a `FUTEX_WAIT` on the wake word. Elsewhere it is a
//! `parking_lot` condvar. Under loom it is a yield; callers always re-check,
//! so a spurious return is fine.

use std::sync::Arc;
use std::time::Duration;

use crate::segment::{Segment, Side};
use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken, the word already changed, or a spurious return.
    Woken,
    /// The timeout elapsed with no wake.
    TimedOut,
}

/// Result of checking a counter against a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The counter moved; here is the new value.
    Changed(u64),
    /// The counter still equals the cached value. `wake` is the wake word
    /// snapshot to hand to [`Signal::wait`].
    Unchanged { wake: u32 },
}

/// A position counter together with its wake word.
pub struct Signal<'a> {
    counter: &'a AtomicU64,
    wake: &'a AtomicU32,
}

impl<'a> Signal<'a> {
    pub(crate) fn new(counter: &'a AtomicU64, wake: &'a AtomicU32) -> Self {
        Self { counter, wake }
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Compare the live counter with `cached`.
    #[inline]
    pub fn observe(&self, cached: u64) -> Observation {
        let wake = self.wake.load(Ordering::Acquire);
        let value = self.counter.load(Ordering::Acquire);
        if value != cached {
            Observation::Changed(value)
        } else {
            Observation::Unchanged { wake }
        }
    }

    /// Store `value` and wake every waiter.
    #[inline]
    pub fn publish(&self, value: u64) {
        self.counter.store(value, Ordering::Release);
        self.notify();
    }

    /// Wake every waiter without moving the counter.
    #[inline]
    pub fn notify(&self) {
        self.wake.fetch_add(1, Ordering::Release);
        futex_signal(self.wake);
    }

    /// Block the calling thread while the wake word equals `wake`.
    #[inline]
    pub fn wait(&self, wake: u32, timeout: Option<Duration>) -> WaitOutcome {
        futex_wait(self.wake, wake, timeout)
    }
}

/// Async form of [`Signal::wait`] on `side`'s counter of `segment`.
///
/// The blocking wait runs on tokio's blocking pool so the calling task is
/// suspended, not the worker thread.
pub async fn wait_async(
    segment: &Arc<Segment>,
    side: Side,
    wake: u32,
    timeout: Option<Duration>,
) -> WaitOutcome {
    let segment = Arc::clone(segment);
    match tokio::task::spawn_blocking(move || segment.signal(side).wait(wake, timeout)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(%err, %side, "blocking wait task failed");
            WaitOutcome::Woken
        }
    }
}

#[cfg(all(target_os = "linux", not(feature = "loom")))]
mod imp {
    use std::ptr;
    use std::time::Duration;

    use super::WaitOutcome;
    use crate::sync::AtomicU32;

    pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let ts = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAIT,
                expected,
                ts_ptr,
                ptr::null::<u32>(),
                0u32,
            )
        };

        if ret == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ETIMEDOUT) {
                return WaitOutcome::TimedOut;
            }
        }
        // EAGAIN (word already changed) and EINTR both mean "re-check".
        WaitOutcome::Woken
    }

    pub fn futex_signal(word: &AtomicU32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAKE,
                i32::MAX,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

#[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
mod imp {
    use std::time::Duration;

    use parking_lot::{Condvar, Mutex};

    use super::WaitOutcome;
    use crate::sync::{AtomicU32, Ordering};

    // One lock for every wake word in the process. Wakers take it after
    // bumping the word, so a waiter that checked the word under the lock
    // cannot miss the notify.
    static LOCK: Mutex<()> = parking_lot::const_mutex(());
    static CONDVAR: Condvar = Condvar::new();

    pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let mut guard = LOCK.lock();
        if word.load(Ordering::Acquire) != expected {
            return WaitOutcome::Woken;
        }
        match timeout {
            Some(timeout) => {
                if CONDVAR.wait_for(&mut guard, timeout).timed_out() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Woken
                }
            }
            None => {
                CONDVAR.wait(&mut guard);
                WaitOutcome::Woken
            }
        }
    }

    pub fn futex_signal(_word: &AtomicU32) {
        let _guard = LOCK.lock();
        CONDVAR.notify_all();
    }
}

#[cfg(feature = "loom")]
mod imp {
    use std::time::Duration;

    use super::WaitOutcome;
    use crate::sync::{AtomicU32, Ordering, thread};

    pub fn futex_wait(word: &AtomicU32, expected: u32, _timeout: Option<Duration>) -> WaitOutcome {
        if word.load(Ordering::Acquire) == expected {
            thread::yield_now();
        }
        WaitOutcome::Woken
    }

    pub fn futex_signal(_word: &AtomicU32) {}
}

pub(crate) use imp::{futex_signal, futex_wait};
