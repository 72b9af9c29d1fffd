//! Interval reconstruction.
//!
//! Derives the work and break timers from a raw event list. Nothing computed
//! here is stored; callers recompute whenever the underlying events change.
//!
//! # Algorithm Summary
//!
//! 1. Order events by timestamp, breaking ties by store sequence
//! 2. Fold over them once, keeping the last open work and break start
//! 3. `BREAK_START` pauses the work timer and `BREAK_END` resumes it
//! 4. For live queries, extrapolate whatever is still open up to "now"

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{TimedEvent, chronological};
use crate::event_type::{EventType, IntervalKind};

/// A closed (or, for live queries, extrapolated) span of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// True when `end` is the live instant rather than a recorded event.
    pub open: bool,
}

impl Segment {
    pub fn duration_ms(&self) -> i64 {
        elapsed_ms(self.start, self.end)
    }
}

/// Result of reconstructing a sequence of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Net work time in milliseconds. Breaks are never counted here.
    pub work_ms: i64,

    /// Total break time in milliseconds.
    pub break_ms: i64,

    /// Whether the work timer is running at the end of the sequence.
    pub is_work_open: bool,

    /// Whether a break is running at the end of the sequence.
    pub is_break_open: bool,

    /// Whether a workday was started and not ended, breaks included.
    pub workday_active: bool,

    /// When the running work timer started, if any.
    pub work_open_since: Option<DateTime<Utc>>,

    /// When the running break started, if any.
    pub break_open_since: Option<DateTime<Utc>>,

    /// Work spans in order.
    pub work_segments: Vec<Segment>,

    /// Break spans in order.
    pub break_segments: Vec<Segment>,
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}

/// Reconstruct work and break timers from events.
///
/// Events may be passed in any order; they are processed by timestamp with
/// ties broken by sequence. Orphaned events contribute nothing.
///
/// A `WORK_START` while a break is open is ignored by the timer. The event
/// stays in the store; only the timer disregards it.
///
/// # Arguments
///
/// * `events` - Events for one user, already restricted to a day or range
/// * `live_until` - The current instant for live queries. Open timers are
///   extrapolated up to it; `None` leaves them open with no contribution.
pub fn reconstruct<E: TimedEvent>(
    events: &[E],
    live_until: Option<DateTime<Utc>>,
) -> Reconstruction {
    let mut last_work_start: Option<DateTime<Utc>> = None;
    let mut last_break_start: Option<DateTime<Utc>> = None;
    let mut workday_active = false;
    let mut result = Reconstruction::default();

    for event in chronological(events) {
        let at = event.timestamp();
        match event.event_type() {
            EventType::WorkStart => {
                workday_active = true;
                if last_break_start.is_none() {
                    last_work_start = Some(at);
                }
            }
            EventType::WorkEnd => {
                workday_active = false;
                if let Some(start) = last_work_start.take() {
                    close(&mut result.work_segments, &mut result.work_ms, start, at);
                }
            }
            EventType::BreakStart => {
                if let Some(start) = last_work_start.take() {
                    close(&mut result.work_segments, &mut result.work_ms, start, at);
                }
                last_break_start = Some(at);
            }
            EventType::BreakEnd => {
                if let Some(start) = last_break_start.take() {
                    close(&mut result.break_segments, &mut result.break_ms, start, at);
                    last_work_start = Some(at);
                }
            }
            _ => {}
        }
    }

    if let Some(now) = live_until {
        // The work timer only runs while no break is open.
        if let (Some(start), None) = (last_work_start, last_break_start) {
            extrapolate(&mut result.work_segments, &mut result.work_ms, start, now);
        }
        if let Some(start) = last_break_start {
            extrapolate(&mut result.break_segments, &mut result.break_ms, start, now);
        }
    }

    result.is_work_open = last_work_start.is_some();
    result.is_break_open = last_break_start.is_some();
    result.workday_active = workday_active;
    result.work_open_since = last_work_start;
    result.break_open_since = last_break_start;

    tracing::debug!(
        work_ms = result.work_ms,
        break_ms = result.break_ms,
        work_open = result.is_work_open,
        break_open = result.is_break_open,
        "reconstructed timers"
    );

    result
}

fn close(segments: &mut Vec<Segment>, total: &mut i64, start: DateTime<Utc>, end: DateTime<Utc>) {
    *total += elapsed_ms(start, end);
    segments.push(Segment {
        start,
        end,
        open: false,
    });
}

fn extrapolate(
    segments: &mut Vec<Segment>,
    total: &mut i64,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    *total += elapsed_ms(start, now);
    segments.push(Segment {
        start,
        end: now,
        open: true,
    });
}

/// Returns the currently open event of an interval kind.
///
/// That is the latest start event with no later matching end event. This is
/// always derived from the events; there is no cached "active" state.
pub fn open_event<E: TimedEvent>(events: &[E], kind: IntervalKind) -> Option<&E> {
    let mut open = None;
    for event in chronological(events) {
        let event_type = event.event_type();
        if event_type == kind.start() {
            open = Some(event);
        } else if event_type == kind.end() {
            open = None;
        }
    }
    open
}
