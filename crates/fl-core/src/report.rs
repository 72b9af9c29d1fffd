//! Report aggregation.
//!
//! Turns the events of a date range into one row per calendar day, grouped
//! into fixed-size pages, plus range totals. Layout is left to the renderer;
//! this module only supplies rows and numbers.
//!
//! A shift belongs to the local day its `WORK_START` falls on. Breaks and the
//! closing `WORK_END` of a shift that runs past midnight are counted on that
//! day, together with the odometer readings. A shift is not followed beyond
//! the next calendar day; later events start over on their own day.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rayon::prelude::*;
use serde::Serialize;

use crate::event::{TimedEvent, chronological};
use crate::event_type::EventType;
use crate::reconstruct::{Segment, reconstruct};

/// Milliseconds in an hour.
pub const HOUR_MS: i64 = 3_600_000;

/// Configuration for report aggregation.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions<Tz: TimeZone = Utc> {
    /// Time zone used to assign events to local calendar days. The offset is
    /// resolved per instant, so days across a DST change stay aligned.
    /// Default: UTC.
    pub timezone: Tz,

    /// Expected net work per worked day.
    /// Default: 8 hours.
    pub expected_daily_ms: i64,

    /// Days per page.
    /// Default: 14.
    pub page_days: usize,
}

impl<Tz: TimeZone> ReportOptions<Tz> {
    /// Default expectation and page size for the given time zone.
    pub const fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            expected_daily_ms: 8 * HOUR_MS,
            page_days: 14,
        }
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::new(Utc)
    }
}

/// What a row stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayKind {
    /// At least one workday event on this day.
    Worked,
    /// No events.
    Empty,
    Vacation,
    SickLeave,
    /// Filler after the last day of the range, so pages stay uniform.
    Padding,
}

/// One calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayRow {
    pub date: NaiveDate,
    pub kind: DayKind,
    pub work_intervals: Vec<Segment>,
    pub break_intervals: Vec<Segment>,
    pub net_work_ms: i64,
    pub break_ms: i64,
    pub start_odometer_km: Option<i64>,
    pub end_odometer_km: Option<i64>,
    /// `None` when either reading is missing.
    pub driven_km: Option<i64>,
    pub is_weekend: bool,
}

impl DayRow {
    fn placeholder(date: NaiveDate, kind: DayKind) -> Self {
        Self {
            date,
            kind,
            work_intervals: Vec::new(),
            break_intervals: Vec::new(),
            net_work_ms: 0,
            break_ms: 0,
            start_odometer_km: None,
            end_odometer_km: None,
            driven_km: None,
            is_weekend: is_weekend(date),
        }
    }
}

/// A fixed-size block of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Zero-based page number.
    pub index: usize,
    pub rows: Vec<DayRow>,
}

/// Range totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub net_work_ms: i64,
    pub break_ms: i64,
    pub worked_days: i64,
    pub vacation_days: i64,
    pub sick_days: i64,
    /// Net work minus the expectation for every worked day. May be negative.
    pub overtime_ms: i64,
    pub driven_km: i64,
}

/// Aggregated report for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub pages: Vec<Page>,
    pub totals: ReportTotals,
}

impl Report {
    /// Rows for real days, without padding.
    pub fn days(&self) -> impl Iterator<Item = &DayRow> {
        self.pages
            .iter()
            .flat_map(|page| page.rows.iter())
            .filter(|row| row.kind != DayKind::Padding)
    }
}

/// Widens a range to whole Monday to Sunday weeks.
pub fn week_range(from: NaiveDate, to: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = from - Duration::days(i64::from(from.weekday().num_days_from_monday()));
    let end = to + Duration::days(i64::from(6 - to.weekday().num_days_from_monday()));
    (start, end)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Distance between two readings, zero when the odometer went backwards.
pub fn driven_km(start: Option<i64>, end: Option<i64>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).max(0)),
        _ => None,
    }
}

/// Aggregate events into day rows, pages and totals.
///
/// Every day from `from` to `to` (inclusive) gets a row. An empty range
/// (`to` before `from`) yields no pages.
///
/// # Arguments
///
/// * `events` - Events for one user; need not be ordered or range-restricted.
///   Pass the day before `from` and after `to` as well so that shifts
///   crossing the range edges are attributed correctly.
/// * `from`, `to` - Inclusive local date range
/// * `options` - Time zone, daily expectation and page size
/// * `now` - The current instant for live reports. Open timers on the local
///   day containing `now`, or of a shift still running from the day before,
///   are extrapolated to it.
pub fn aggregate<E: TimedEvent + Sync, Tz: TimeZone>(
    events: &[E],
    from: NaiveDate,
    to: NaiveDate,
    options: &ReportOptions<Tz>,
    now: Option<DateTime<Utc>>,
) -> Report {
    let local_date = |at: DateTime<Utc>| at.with_timezone(&options.timezone).date_naive();

    let mut by_day: HashMap<NaiveDate, Vec<&E>> = HashMap::new();
    let mut absences: HashMap<NaiveDate, DayKind> = HashMap::new();
    let mut shift: Option<NaiveDate> = None;
    for event in chronological(events) {
        let own = local_date(event.timestamp());
        let event_type = event.event_type();
        // Abandon a shift left open for more than a night.
        if shift.is_some_and(|started| own > started + Duration::days(1)) {
            shift = None;
        }
        if event_type.is_absence() {
            let kind = if event_type == EventType::Vacation {
                DayKind::Vacation
            } else {
                DayKind::SickLeave
            };
            let last = event.until().unwrap_or(own);
            for day in own.iter_days().take_while(|d| *d <= last) {
                if day > to {
                    break;
                }
                if day >= from {
                    absences.insert(day, kind);
                }
            }
            continue;
        }

        let date = match event_type {
            EventType::WorkStart => *shift.insert(own),
            EventType::WorkEnd => shift.take().unwrap_or(own),
            _ => shift.unwrap_or(own),
        };
        if (from..=to).contains(&date) {
            by_day.entry(date).or_default().push(event);
        }
    }

    let today = now.map(local_date);
    // A shift still open at the end may run past midnight into today.
    let running = shift.filter(|started| today.is_some_and(|t| *started + Duration::days(1) >= t));
    let dates: Vec<NaiveDate> = from.iter_days().take_while(|d| *d <= to).collect();
    let rows: Vec<DayRow> = dates
        .par_iter()
        .map(|&date| {
            let live = today == Some(date) || running == Some(date);
            let live_until = if live { now } else { None };
            build_row(
                date,
                by_day.get(&date).map(Vec::as_slice),
                absences.get(&date).copied(),
                live_until,
            )
        })
        .collect();

    let totals = totals(&rows, options.expected_daily_ms);
    let pages = paginate(rows, options.page_days.max(1));

    tracing::debug!(
        %from,
        %to,
        pages = pages.len(),
        worked_days = totals.worked_days,
        "aggregated report"
    );

    Report {
        from,
        to,
        pages,
        totals,
    }
}

fn build_row<E: TimedEvent>(
    date: NaiveDate,
    events: Option<&[&E]>,
    absence: Option<DayKind>,
    live_until: Option<DateTime<Utc>>,
) -> DayRow {
    let events = events.unwrap_or_default();
    let worked = events.iter().any(|e| {
        matches!(
            e.event_type(),
            EventType::WorkStart | EventType::WorkEnd | EventType::BreakStart | EventType::BreakEnd
        )
    });
    if !worked {
        return DayRow::placeholder(date, absence.unwrap_or(DayKind::Empty));
    }

    let reconstruction = reconstruct(events, live_until);

    // Events arrive in chronological order.
    let start_odometer_km = events
        .iter()
        .filter(|e| e.event_type() == EventType::WorkStart)
        .find_map(|e| e.odometer_km());
    let end_odometer_km = events
        .iter()
        .rev()
        .filter(|e| e.event_type() == EventType::WorkEnd)
        .find_map(|e| e.odometer_km());

    DayRow {
        date,
        kind: DayKind::Worked,
        work_intervals: reconstruction.work_segments,
        break_intervals: reconstruction.break_segments,
        net_work_ms: reconstruction.work_ms,
        break_ms: reconstruction.break_ms,
        start_odometer_km,
        end_odometer_km,
        driven_km: driven_km(start_odometer_km, end_odometer_km),
        is_weekend: is_weekend(date),
    }
}

fn totals(rows: &[DayRow], expected_daily_ms: i64) -> ReportTotals {
    let mut totals = ReportTotals::default();
    for row in rows {
        totals.net_work_ms += row.net_work_ms;
        totals.break_ms += row.break_ms;
        totals.driven_km += row.driven_km.unwrap_or(0);
        match row.kind {
            DayKind::Worked => totals.worked_days += 1,
            DayKind::Vacation => totals.vacation_days += 1,
            DayKind::SickLeave => totals.sick_days += 1,
            DayKind::Empty | DayKind::Padding => {}
        }
    }
    totals.overtime_ms = totals.net_work_ms - totals.worked_days * expected_daily_ms;
    totals
}

fn paginate(rows: Vec<DayRow>, page_days: usize) -> Vec<Page> {
    let mut pages: Vec<Page> = Vec::new();
    let mut current: Vec<DayRow> = Vec::with_capacity(page_days);
    for row in rows {
        current.push(row);
        if current.len() == page_days {
            pages.push(Page {
                index: pages.len(),
                rows: std::mem::replace(&mut current, Vec::with_capacity(page_days)),
            });
        }
    }
    if let Some(last) = current.last().map(|row| row.date) {
        let missing = page_days - current.len();
        current.extend(
            last.iter_days()
                .skip(1)
                .take(missing)
                .map(|date| DayRow::placeholder(date, DayKind::Padding)),
        );
        pages.push(Page {
            index: pages.len(),
            rows: current,
        });
    }
    pages
}
