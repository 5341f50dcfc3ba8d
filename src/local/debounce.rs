// src/local/debounce.rs

//! Restartable quiet-period timer.
//!
//! Interactive window dragging produces a storm of resize events; the local
//! surface restarts this timer on every one, and only a timer that reaches
//! its deadline un-restarted fires the action. The action runs on the timer
//! thread, so it must be quick and must not call back into the timer.

use anyhow::{Context, Result};
use log::debug;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct DebounceTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

struct TimerShared {
    delay: Duration,
    state: Mutex<TimerState>,
    changed: Condvar,
}

struct TimerState {
    deadline: Option<Instant>,
    stop: bool,
}

impl DebounceTimer {
    pub fn new(delay: Duration, action: Box<dyn Fn() + Send>) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            delay,
            state: Mutex::new(TimerState {
                deadline: None,
                stop: false,
            }),
            changed: Condvar::new(),
        });

        let thread = thread::Builder::new()
            .name("canvas-debounce".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_timer(&shared, action)
            })
            .context("Failed to spawn debounce timer thread")?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Arm the timer, or push an armed timer's deadline back out to the
    /// full delay.
    pub fn restart(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = Some(Instant::now() + self.shared.delay);
        drop(state);
        self.shared.changed.notify_one();
    }

    /// Disarm without firing.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.deadline = None;
        drop(state);
        self.shared.changed.notify_one();
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stop = true;
        }
        self.shared.changed.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_timer(shared: &TimerShared, action: Box<dyn Fn() + Send>) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.stop {
            break;
        }
        match state.deadline {
            None => {
                state = shared.changed.wait(state).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    // Quiet period elapsed without a restart.
                    state.deadline = None;
                    drop(state);
                    action();
                    state = shared.state.lock().unwrap();
                } else {
                    // A restart while we sleep moves the deadline; waking
                    // early just re-enters this check.
                    let (guard, _) = shared
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
            }
        }
    }
    debug!("canvas-debounce stopped");
}
