//! Scheduling utilities - call coalescing for bursts of layout invalidation.
//!
//! - [`debounce`]: invoke once a burst goes quiet (optionally on its leading edge)
//! - [`throttle`]: invoke at most once per interval during a burst
//!
//! Both return a [`Debounced`] handle with `call`, `cancel`, `flush` and `pending`.

mod debounce;
mod throttle;

pub use debounce::*;
pub use throttle::*;
