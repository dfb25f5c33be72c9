// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Process-wide stop flag shared by both loops and the owner thread.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut triggered = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !*triggered;
        *triggered = true;
        cvar.notify_all();
        first
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = cvar
            .wait_while(guard, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Wait up to `timeout`; returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("{name} thread did not exit within {timeout:?}")]
    TimedOut { name: String, timeout: Duration },
    #[error("{name} thread panicked")]
    Panicked { name: String },
}

/// Join `handle`, giving up after `timeout`. A thread that overruns is left
/// detached and reported.
pub fn join_with_timeout(
    handle: JoinHandle<()>,
    timeout: Duration,
    name: &str,
) -> Result<(), JoinError> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(JoinError::TimedOut {
                name: name.to_string(),
                timeout,
            });
        }
        thread::sleep(JOIN_POLL);
    }
    handle.join().map_err(|_| JoinError::Panicked {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_wakes_waiters_once() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        assert!(signal.trigger());
        assert!(!signal.trigger());
        waiter.join().unwrap();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_join_with_timeout() {
        let quick = thread::spawn(|| {});
        assert_eq!(join_with_timeout(quick, Duration::from_secs(1), "quick"), Ok(()));

        let slow = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(matches!(
            join_with_timeout(slow, Duration::from_millis(20), "slow"),
            Err(JoinError::TimedOut { .. })
        ));

        let panicky = thread::spawn(|| panic!("boom"));
        assert_eq!(
            join_with_timeout(panicky, Duration::from_secs(1), "panicky"),
            Err(JoinError::Panicked {
                name: "panicky".into()
            })
        );
    }
}
