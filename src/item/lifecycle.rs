//! Item Lifecycle - per-item load/retry/fallback state machine.
//!
//! Pure and synchronous: [`Lifecycle::handle`] takes one event and returns
//! the effects the driver has to carry out (start a measurement, arm a retry
//! timer, ...). No timers or futures live here, so every transition can be
//! tested without a runtime.
//!
//! # Phases
//!
//! ```text
//! Pending ──loaded──▶ Measuring ──usable height──▶ Resolved(Measured)
//!    ▲                    │
//!    │                 failure ──▶ (mode decides)
//!    │                    │
//!    └──retry elapsed── RetryWaiting          Placeholder ──loaded──▶ PlaceholderMeasuring
//! ```
//!
//! Every non-resolved phase moves to `Resolved(TimedOut)` when the max-wait
//! timer fires. Every resolved phase carries a concrete height, so the
//! column allocator is never blocked by a failing item.

use std::time::Duration;

use crate::error::MeasureError;
use crate::types::{ErrorInfo, ErrorMode, ErrorStatus};

use super::measure::is_usable_height;

// =============================================================================
// Types
// =============================================================================

/// Recovery settings for one item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub mode: ErrorMode,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub fallback_height: f32,
}

impl RetryPolicy {
    /// Retries this policy allows. Zero for `none` and `placeholder`.
    pub fn budget(&self) -> u32 {
        match self.mode {
            ErrorMode::Retry | ErrorMode::Fallback => self.max_retries,
            ErrorMode::None | ErrorMode::Placeholder => 0,
        }
    }
}

/// How a resolved item got its height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Measured after the asset rendered.
    Measured,
    /// Known up front from the item's width and height.
    Intrinsic,
    /// Measured from the placeholder asset.
    PlaceholderMeasured,
    /// Fallback height after a failure.
    Fallback,
    /// Fallback height after the max-wait timer fired.
    TimedOut,
}

impl Resolution {
    /// Whether the height describes the real asset.
    pub fn is_real(&self) -> bool {
        matches!(self, Resolution::Measured | Resolution::Intrinsic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Waiting for the renderer to report the asset.
    Pending,
    /// Asset rendered, measurement in flight.
    Measuring,
    /// Waiting out the retry delay.
    RetryWaiting,
    /// Placeholder asset rendering.
    Placeholder,
    /// Placeholder rendered, measurement in flight.
    PlaceholderMeasuring,
    Resolved(Resolution),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LifecycleEvent {
    AssetLoaded,
    AssetFailed,
    Measured(f32),
    RetryElapsed,
    PlaceholderLoaded,
    PlaceholderFailed,
    /// The max-wait timer fired after the given duration.
    TimedOut(Duration),
}

/// Work the driver has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Measure the rendered element and report `Measured`.
    Measure,
    /// Report `RetryElapsed` after the delay.
    ScheduleRetry(Duration),
    /// Re-render the asset for a new attempt.
    Reload,
    /// Render the placeholder asset.
    ShowPlaceholder,
    /// Retry telemetry: the attempt number just scheduled.
    Retried(u32),
    /// Terminal: the item has a height and can be placed.
    Resolved { height: f32, height_error: bool },
}

// =============================================================================
// Lifecycle
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Lifecycle {
    policy: RetryPolicy,
    phase: LoadPhase,
    retry_count: u32,
    height: Option<f32>,
    error_info: ErrorInfo,
}

impl Lifecycle {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            phase: LoadPhase::Pending,
            retry_count: 0,
            height: None,
            error_info: ErrorInfo::default(),
        }
    }

    /// Lifecycle for an item whose size is known up front.
    ///
    /// The height depends on the column width, so it is left to the layout.
    pub fn intrinsic(policy: RetryPolicy) -> Self {
        Self {
            phase: LoadPhase::Resolved(Resolution::Intrinsic),
            ..Self::new(policy)
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Swap in new recovery settings. Takes effect from the next event.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self.phase {
            LoadPhase::Resolved(resolution) => Some(resolution),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution().is_some()
    }

    pub fn height(&self) -> Option<f32> {
        self.height
    }

    pub fn height_error(&self) -> bool {
        self.resolution().is_some_and(|r| !r.is_real())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error_info(&self) -> &ErrorInfo {
        &self.error_info
    }

    /// Start over, as if the item had just been created.
    pub fn reset(&mut self) {
        let intrinsic = self.resolution() == Some(Resolution::Intrinsic);
        *self = if intrinsic {
            Self::intrinsic(self.policy)
        } else {
            Self::new(self.policy)
        };
    }

    /// Apply one event. Events that don't fit the current phase are ignored.
    pub fn handle(&mut self, event: LifecycleEvent) -> Vec<Effect> {
        use LifecycleEvent as E;
        use LoadPhase as P;

        match (self.phase, event) {
            (P::Resolved(_), E::TimedOut(_)) => Vec::new(),
            (_, E::TimedOut(after)) => self.resolve(
                Resolution::TimedOut,
                self.policy.fallback_height,
                ErrorInfo::new(ErrorStatus::Timeout, MeasureError::Timeout(after).to_string()),
            ),

            (P::Pending, E::AssetLoaded) => {
                self.phase = P::Measuring;
                vec![Effect::Measure]
            }
            (P::Pending | P::Measuring, E::AssetFailed) => self.fail(MeasureError::Failure),
            (P::Measuring, E::Measured(height)) => {
                if is_usable_height(height) {
                    self.resolve(Resolution::Measured, height, ErrorInfo::default())
                } else {
                    self.fail(MeasureError::HeightAnomaly(height))
                }
            }

            (P::RetryWaiting, E::RetryElapsed) => {
                self.phase = P::Pending;
                vec![Effect::Reload]
            }

            (P::Placeholder, E::PlaceholderLoaded) => {
                self.phase = P::PlaceholderMeasuring;
                vec![Effect::Measure]
            }
            (P::Placeholder | P::PlaceholderMeasuring, E::PlaceholderFailed) => self.give_up(),
            (P::PlaceholderMeasuring, E::Measured(height)) => {
                if is_usable_height(height) {
                    self.resolve(
                        Resolution::PlaceholderMeasured,
                        height,
                        ErrorInfo::new(ErrorStatus::PlaceholderOk, "placeholder shown"),
                    )
                } else {
                    self.give_up()
                }
            }

            // Placeholder mode resolves before the placeholder renders; its
            // outcome only changes what the renderer is told
            (P::Resolved(Resolution::Fallback), E::PlaceholderLoaded)
                if self.awaits_placeholder_status() =>
            {
                self.error_info = ErrorInfo::new(ErrorStatus::PlaceholderOk, "placeholder shown");
                Vec::new()
            }
            (P::Resolved(Resolution::Fallback), E::PlaceholderFailed)
                if self.awaits_placeholder_status() =>
            {
                self.error_info = ErrorInfo::new(ErrorStatus::Final, "placeholder failed to load");
                Vec::new()
            }

            _ => Vec::new(),
        }
    }

    fn awaits_placeholder_status(&self) -> bool {
        self.policy.mode == ErrorMode::Placeholder && self.error_info.status == ErrorStatus::Fail
    }

    fn fail(&mut self, err: MeasureError) -> Vec<Effect> {
        let fallback_height = self.policy.fallback_height;

        match self.policy.mode {
            ErrorMode::None => self.resolve(
                Resolution::Fallback,
                fallback_height,
                ErrorInfo::new(ErrorStatus::Fail, err.to_string()),
            ),
            ErrorMode::Placeholder => {
                let mut effects = vec![Effect::ShowPlaceholder];
                effects.extend(self.resolve(
                    Resolution::Fallback,
                    fallback_height,
                    ErrorInfo::new(ErrorStatus::Fail, err.to_string()),
                ));
                effects
            }
            ErrorMode::Retry | ErrorMode::Fallback if self.retry_count < self.policy.budget() => {
                self.retry_count += 1;
                self.phase = LoadPhase::RetryWaiting;
                self.error_info = ErrorInfo::new(
                    ErrorStatus::Fail,
                    format!("{err}, retry {}/{}", self.retry_count, self.policy.max_retries),
                );
                vec![
                    Effect::Retried(self.retry_count),
                    Effect::ScheduleRetry(self.policy.retry_delay),
                ]
            }
            ErrorMode::Retry => self.resolve(
                Resolution::Fallback,
                fallback_height,
                ErrorInfo::new(
                    ErrorStatus::Final,
                    format!("{err} after {} retries", self.retry_count),
                ),
            ),
            ErrorMode::Fallback => {
                self.phase = LoadPhase::Placeholder;
                self.error_info =
                    ErrorInfo::new(ErrorStatus::Fail, format!("{err}, showing placeholder"));
                vec![Effect::ShowPlaceholder]
            }
        }
    }

    fn give_up(&mut self) -> Vec<Effect> {
        self.resolve(
            Resolution::Fallback,
            self.policy.fallback_height,
            ErrorInfo::new(ErrorStatus::Final, "placeholder failed to load"),
        )
    }

    fn resolve(&mut self, resolution: Resolution, height: f32, info: ErrorInfo) -> Vec<Effect> {
        self.phase = LoadPhase::Resolved(resolution);
        self.height = Some(height);
        self.error_info = info;
        vec![Effect::Resolved {
            height,
            height_error: !resolution.is_real(),
        }]
    }
}
