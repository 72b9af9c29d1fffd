//! Speed-based loading detection.
//!
//! A sustained stop during an active workday is promoted to a loading
//! interval once it has lasted for the dwell time. The detector is a plain
//! state machine: the caller feeds it speed samples and wakes it at
//! [`LoadingDetector::deadline`] so a pending stop can be promoted without a
//! new sample.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event_type::EventType;
use crate::location::SpeedSample;
use crate::reconstruct::Reconstruction;
use crate::types::Location;

/// Configuration for loading detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Speeds strictly below this count as stopped.
    /// Default: 20 km/h.
    pub threshold_kmh: f64,

    /// How long a stop must last before it becomes a loading interval.
    /// Default: 120 seconds.
    pub dwell_secs: i64,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            threshold_kmh: 20.0,
            dwell_secs: 120,
        }
    }
}

impl LoadingConfig {
    pub fn dwell(&self) -> Duration {
        Duration::seconds(self.dwell_secs.max(0))
    }
}

/// Whether the heuristic may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkdayContext {
    pub workday_active: bool,
    pub break_active: bool,
}

impl WorkdayContext {
    /// Detection only runs during an active workday outside of breaks.
    pub const fn is_eligible(self) -> bool {
        self.workday_active && !self.break_active
    }
}

impl From<&Reconstruction> for WorkdayContext {
    fn from(reconstruction: &Reconstruction) -> Self {
        Self {
            workday_active: reconstruction.workday_active,
            break_active: reconstruction.is_break_open,
        }
    }
}

/// Current detector state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetectorState {
    /// Moving, or not yet observed.
    #[default]
    Above,
    /// Stopped since `since`; promoted at `promote_at` unless speed recovers.
    Pending {
        since: DateTime<Utc>,
        promote_at: DateTime<Utc>,
        location: Option<Location>,
    },
    /// A loading interval is open.
    Active { since: DateTime<Utc> },
}

/// An event the detector wants recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadingTransition {
    /// Stamped with the first stopped sample, not the promotion time.
    Start {
        at: DateTime<Utc>,
        location: Option<Location>,
    },
    End {
        at: DateTime<Utc>,
        location: Option<Location>,
    },
}

impl LoadingTransition {
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Start { .. } => EventType::LoadingStart,
            Self::End { .. } => EventType::LoadingEnd,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Start { at, .. } | Self::End { at, .. } => *at,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Start { location, .. } | Self::End { location, .. } => location.as_ref(),
        }
    }
}

/// Loading interval detector for a single user.
#[derive(Debug, Clone)]
pub struct LoadingDetector {
    config: LoadingConfig,
    state: DetectorState,
}

impl LoadingDetector {
    pub fn new(config: LoadingConfig) -> Self {
        Self {
            config,
            state: DetectorState::Above,
        }
    }

    /// Creates a detector that continues an already open loading interval.
    pub fn resume(config: LoadingConfig, open_since: Option<DateTime<Utc>>) -> Self {
        let state = open_since.map_or(DetectorState::Above, |since| DetectorState::Active { since });
        Self { config, state }
    }

    pub const fn state(&self) -> &DetectorState {
        &self.state
    }

    pub const fn config(&self) -> &LoadingConfig {
        &self.config
    }

    /// When the pending stop will be promoted, if one is pending.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            DetectorState::Pending { promote_at, .. } => Some(promote_at),
            _ => None,
        }
    }

    /// Promotes a pending stop whose deadline has passed.
    ///
    /// Does nothing unless the detector is still pending, so a timer that
    /// outlived its condition cannot promote.
    pub fn fire(&mut self, now: DateTime<Utc>) -> Option<LoadingTransition> {
        let DetectorState::Pending { promote_at, .. } = self.state else {
            return None;
        };
        if now < promote_at {
            return None;
        }
        let DetectorState::Pending { since, location, .. } = std::mem::take(&mut self.state) else {
            return None;
        };
        tracing::debug!(since = %since, "stop promoted to loading");
        self.state = DetectorState::Active { since };
        Some(LoadingTransition::Start { at: since, location })
    }

    /// Leaves the eligible period: cancels a pending stop and closes an open
    /// interval at `at`.
    pub fn suspend(
        &mut self,
        at: DateTime<Utc>,
        location: Option<Location>,
    ) -> Option<LoadingTransition> {
        let previous = std::mem::take(&mut self.state);
        match previous {
            DetectorState::Active { .. } => {
                tracing::debug!("loading closed by suspension");
                Some(LoadingTransition::End { at, location })
            }
            DetectorState::Pending { .. } => {
                tracing::debug!("pending stop cancelled by suspension");
                None
            }
            DetectorState::Above => None,
        }
    }

    /// Feeds one speed sample.
    ///
    /// A sample that arrives after a pending deadline first promotes, then
    /// is processed, so the result can hold two transitions. An ineligible
    /// sample cancels a pending stop without promoting it, whatever its
    /// deadline; callers promote on time by waking the detector with
    /// [`fire`](Self::fire).
    pub fn observe(
        &mut self,
        sample: &SpeedSample,
        context: WorkdayContext,
    ) -> Vec<LoadingTransition> {
        if !context.is_eligible() {
            return self
                .suspend(sample.timestamp, sample.location.clone())
                .into_iter()
                .collect();
        }

        let mut transitions = Vec::new();
        transitions.extend(self.fire(sample.timestamp));

        let stopped = sample.speed_kmh < self.config.threshold_kmh;
        match (&self.state, stopped) {
            (DetectorState::Above, true) => {
                self.state = DetectorState::Pending {
                    since: sample.timestamp,
                    promote_at: sample.timestamp + self.config.dwell(),
                    location: sample.location.clone(),
                };
            }
            (DetectorState::Pending { .. }, false) => {
                tracing::debug!(speed_kmh = sample.speed_kmh, "speed recovered before dwell");
                self.state = DetectorState::Above;
            }
            (DetectorState::Active { .. }, false) => {
                transitions.push(LoadingTransition::End {
                    at: sample.timestamp,
                    location: sample.location.clone(),
                });
                self.state = DetectorState::Above;
            }
            _ => {}
        }

        transitions
    }
}

/// Runs the detector over a finite sequence of samples.
///
/// Each sample is paired with the workday context at its time. A stop still
/// pending at the end is not promoted.
pub fn detect<I>(config: LoadingConfig, samples: I) -> Vec<LoadingTransition>
where
    I: IntoIterator<Item = (SpeedSample, WorkdayContext)>,
{
    let mut detector = LoadingDetector::new(config);
    samples
        .into_iter()
        .fold(Vec::new(), |mut transitions, (sample, context)| {
            transitions.extend(detector.observe(&sample, context));
            transitions
        })
}
