//! Throttle - at most one invocation per interval during a burst.
//!
//! A throttle is a debounce whose `max_wait` equals its `wait`, so a
//! continuous stream of calls still invokes once every `wait`.

use std::time::Duration;

use super::debounce::{DebounceOptions, Debounced, debounce};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOptions {
    pub leading: bool,
    pub trailing: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        Self {
            leading: true,
            trailing: true,
        }
    }
}

/// Create a throttled wrapper around `func`.
pub fn throttle<A, R, F>(func: F, wait: Duration, options: ThrottleOptions) -> Debounced<A, R>
where
    A: 'static,
    R: Clone + 'static,
    F: Fn(A) -> R + 'static,
{
    debounce(
        func,
        wait,
        DebounceOptions {
            leading: options.leading,
            trailing: options.trailing,
            max_wait: Some(wait),
        },
    )
}
