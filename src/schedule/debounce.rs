//! Debounce - coalesce a burst of calls into one invocation.
//!
//! # Pattern
//!
//! - Every call records its arguments and restarts the quiet period
//! - `leading` invokes on the first call of a burst
//! - `trailing` invokes with the last arguments once the burst goes quiet
//! - `max_wait` caps how long a continuous burst can postpone an invocation
//!
//! Timers are local tasks (`tokio::task::spawn_local`), so a [`Debounced`]
//! must be called from inside a `tokio::task::LocalSet`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use spark_waterfall::schedule::{debounce, DebounceOptions};
//!
//! let save = debounce(|text: String| persist(&text), Duration::from_millis(300), DebounceOptions::default());
//! save.call("h".into());
//! save.call("hello".into()); // only "hello" is persisted, 300ms later
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Length of one display frame at 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// How long a burst has to stay quiet before the trailing invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Invoke on the next display frame. No wall-clock guarantee.
    Frame,
    /// Invoke after a fixed quiet period.
    Delay(Duration),
}

impl From<Duration> for Wait {
    fn from(delay: Duration) -> Self {
        Wait::Delay(delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceOptions {
    pub leading: bool,
    pub trailing: bool,
    pub max_wait: Option<Duration>,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self {
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

// =============================================================================
// State
// =============================================================================

struct DebounceState<A, R> {
    wait: Duration,
    frame: bool,
    leading: bool,
    trailing: bool,
    max_wait: Option<Duration>,
    last_args: Option<A>,
    last_call: Option<Instant>,
    last_invoke: Option<Instant>,
    result: Option<R>,
    timer: Option<JoinHandle<()>>,
}

impl<A, R> DebounceState<A, R> {
    fn should_invoke(&self, now: Instant) -> bool {
        // First call ever, or first call after the burst went quiet
        let Some(last_call) = self.last_call else {
            return true;
        };
        if now.saturating_duration_since(last_call) >= self.wait {
            return true;
        }
        match (self.max_wait, self.last_invoke) {
            (Some(max_wait), Some(last_invoke)) => {
                now.saturating_duration_since(last_invoke) >= max_wait
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn remaining_wait(&self, now: Instant) -> Duration {
        let since_call = self
            .last_call
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        let waiting = self.wait.saturating_sub(since_call);

        match self.max_wait {
            Some(max_wait) => {
                let since_invoke = self
                    .last_invoke
                    .map_or(max_wait, |t| now.saturating_duration_since(t));
                waiting.min(max_wait.saturating_sub(since_invoke))
            }
            None => waiting,
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

// =============================================================================
// Debounced
// =============================================================================

/// Handle returned by [`debounce`] and [`throttle`](super::throttle).
///
/// Cloning shares the same timer and pending arguments.
pub struct Debounced<A, R> {
    state: Rc<RefCell<DebounceState<A, R>>>,
    func: Rc<dyn Fn(A) -> R>,
}

impl<A, R> Clone for Debounced<A, R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            func: self.func.clone(),
        }
    }
}

/// Create a debounced wrapper around `func`.
///
/// `max_wait` is raised to `wait` if it is shorter.
pub fn debounce<A, R, F>(func: F, wait: impl Into<Wait>, options: DebounceOptions) -> Debounced<A, R>
where
    A: 'static,
    R: Clone + 'static,
    F: Fn(A) -> R + 'static,
{
    let (frame, wait) = match wait.into() {
        Wait::Frame => (true, Duration::ZERO),
        Wait::Delay(delay) => (false, delay),
    };

    Debounced {
        state: Rc::new(RefCell::new(DebounceState {
            wait,
            frame,
            leading: options.leading,
            trailing: options.trailing,
            max_wait: options.max_wait.map(|max_wait| max_wait.max(wait)),
            last_args: None,
            last_call: None,
            last_invoke: None,
            result: None,
            timer: None,
        })),
        func: Rc::new(func),
    }
}

impl<A, R> Debounced<A, R>
where
    A: 'static,
    R: Clone + 'static,
{
    /// Record a call.
    ///
    /// Returns the result of the latest invocation, which is this call's
    /// result only when it triggered an invocation right away.
    pub fn call(&self, args: A) -> Option<R> {
        let now = Instant::now();
        let mut state = self.state.borrow_mut();
        let is_invoking = state.should_invoke(now);

        state.last_args = Some(args);
        state.last_call = Some(now);

        if is_invoking {
            if state.timer.is_none() {
                // Leading edge: arm the trailing timer
                state.last_invoke = Some(now);
                let wait = state.wait;
                self.start_timer(&mut state, wait);
                if state.leading {
                    drop(state);
                    return self.invoke(now);
                }
                return state.result.clone();
            }
            if state.max_wait.is_some() {
                // Burst outlived max_wait
                let wait = state.wait;
                self.start_timer(&mut state, wait);
                drop(state);
                return self.invoke(now);
            }
        }

        if state.timer.is_none() {
            let wait = state.wait;
            self.start_timer(&mut state, wait);
        }
        state.result.clone()
    }

    /// Drop the pending invocation and forget the current burst.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        state.stop_timer();
        state.last_args = None;
        state.last_call = None;
        state.last_invoke = None;
    }

    /// Run the pending trailing invocation now.
    ///
    /// Returns the last result when nothing is pending.
    pub fn flush(&self) -> Option<R> {
        {
            let mut state = self.state.borrow_mut();
            if state.timer.is_none() {
                return state.result.clone();
            }
            state.stop_timer();
        }
        self.trailing_edge(Instant::now())
    }

    /// Whether a trailing invocation is scheduled.
    pub fn pending(&self) -> bool {
        self.state.borrow().timer.is_some()
    }

    fn invoke(&self, now: Instant) -> Option<R> {
        let args = {
            let mut state = self.state.borrow_mut();
            state.last_invoke = Some(now);
            state.last_args.take()
        };
        let Some(args) = args else {
            return self.state.borrow().result.clone();
        };

        // No borrow is held here: `func` may call back into this handle
        let result = (self.func)(args);
        self.state.borrow_mut().result = Some(result.clone());
        Some(result)
    }

    fn trailing_edge(&self, now: Instant) -> Option<R> {
        let invoke = {
            let mut state = self.state.borrow_mut();
            // Released, not aborted: this may be the timer task itself
            state.timer = None;
            if state.trailing && state.last_args.is_some() {
                true
            } else {
                state.last_args = None;
                false
            }
        };

        if invoke {
            self.invoke(now)
        } else {
            self.state.borrow().result.clone()
        }
    }

    /// Returns the time left to wait, or `None` once the burst is settled.
    fn timer_expired(&self) -> Option<Duration> {
        let now = Instant::now();
        let (should_invoke, remaining) = {
            let state = self.state.borrow();
            (state.should_invoke(now), state.remaining_wait(now))
        };

        if should_invoke {
            self.trailing_edge(now);
            None
        } else {
            Some(remaining)
        }
    }

    fn start_timer(&self, state: &mut DebounceState<A, R>, delay: Duration) {
        state.stop_timer();

        let frame = state.frame;
        let weak = Rc::downgrade(&self.state);
        let func = self.func.clone();

        state.timer = Some(tokio::task::spawn_local(async move {
            let mut delay = delay;
            loop {
                time::sleep(if frame { FRAME_INTERVAL } else { delay }).await;

                let Some(state) = weak.upgrade() else { return };
                let debounced = Debounced {
                    state,
                    func: func.clone(),
                };
                match debounced.timer_expired() {
                    Some(remaining) => delay = remaining,
                    None => return,
                }
            }
        }));
    }
}
