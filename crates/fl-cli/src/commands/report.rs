//! Report command for generating work-time reports.
//!
//! This module implements `fl report` with various period options
//! (--week, --last-week, --weeks N, --from/--to) and output formats
//! (human-readable, JSON).

use std::fmt::{self, Write as _};
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use fl_core::{DayKind, DayRow, Report, ReportOptions, UserId, aggregate, week_range};
use fl_db::Database;
use serde::Serialize;

use super::util::{format_duration, format_signed_duration, or_dash, timezone_name};
use crate::cli::ReportArgs;

/// Report period type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Week,
    LastWeek,
    /// The last N weeks, ending with the current one.
    Weeks(u32),
    Range { from: NaiveDate, to: NaiveDate },
}

impl From<&ReportArgs> for Period {
    fn from(args: &ReportArgs) -> Self {
        if let (Some(from), Some(to)) = (args.from, args.to) {
            Self::Range { from, to }
        } else if args.last_week {
            Self::LastWeek
        } else if let Some(weeks) = args.weeks {
            Self::Weeks(weeks)
        } else {
            Self::Week
        }
    }
}

// ========== Period Date Calculation ==========

/// Resolves a period to an inclusive local date range.
///
/// Week periods run Monday to Sunday so that pages line up with weeks.
pub fn resolve_period(period: Period, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    match period {
        Period::Week => Ok(week_range(today, today)),
        Period::LastWeek => {
            let last = today - Duration::days(7);
            Ok(week_range(last, last))
        }
        Period::Weeks(weeks) => {
            let back = i64::from(weeks.max(1) - 1) * 7;
            Ok(week_range(today - Duration::days(back), today))
        }
        Period::Range { from, to } => {
            if to < from {
                anyhow::bail!("--to ({to}) is before --from ({from})");
            }
            Ok((from, to))
        }
    }
}

// ========== Report Generation ==========

/// Computed report data.
#[derive(Debug, Serialize)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub timezone: String,
    #[serde(flatten)]
    pub report: Report,
}

/// Generates report data from the database.
///
/// Events are loaded with a day of margin on both sides so that overnight
/// shifts at the edges of the range land on the right day.
pub fn generate_report_data<Tz: TimeZone>(
    db: &Database,
    user_id: &UserId,
    (from, to): (NaiveDate, NaiveDate),
    options: &ReportOptions<Tz>,
    generated_at: DateTime<Utc>,
) -> Result<ReportData> {
    // Two UTC days cover one local day at any offset.
    let start = (from - Duration::days(2)).and_time(NaiveTime::MIN).and_utc();
    let end = (to + Duration::days(3)).and_time(NaiveTime::MIN).and_utc();
    let events = db.list_events(user_id, Some((start, end)))?;

    let report = aggregate(&events, from, to, options, Some(generated_at));

    Ok(ReportData {
        generated_at,
        timezone: timezone_name(),
        report,
    })
}

fn clock<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    at.with_timezone(tz).format("%H:%M").to_string()
}

fn format_row<Tz: TimeZone>(output: &mut String, row: &DayRow, tz: &Tz)
where
    Tz::Offset: fmt::Display,
{
    let weekday = row.date.weekday().to_string();
    let day = if row.is_weekend {
        format!("{weekday}*")
    } else {
        weekday
    };

    let kind = match row.kind {
        DayKind::Worked => "worked",
        DayKind::Vacation => "vacation",
        DayKind::SickLeave => "sick",
        DayKind::Empty | DayKind::Padding => "",
    };
    let start = row.work_intervals.first().map(|s| clock(s.start, tz));
    let end = row
        .work_intervals
        .last()
        .filter(|s| !s.open)
        .map(|s| clock(s.end, tz));
    let worked = row.kind == DayKind::Worked;
    let work = worked.then(|| format_duration(row.net_work_ms));
    let breaks = worked.then(|| format_duration(row.break_ms));

    let _ = writeln!(
        output,
        "{}  {:<4} {:<8} {:>5} {:>5} {:>8} {:>8} {:>9} {:>9} {:>6}",
        row.date,
        day,
        kind,
        or_dash(start),
        or_dash(end),
        or_dash(work),
        or_dash(breaks),
        or_dash(row.start_odometer_km),
        or_dash(row.end_odometer_km),
        or_dash(row.driven_km),
    );
}

/// Formats the human-readable report output.
pub fn format_report<Tz: TimeZone>(data: &ReportData, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    let report = &data.report;
    let mut output = String::new();

    let _ = writeln!(output, "WORK REPORT: {} to {}", report.from, report.to);
    let _ = writeln!(output, "Timezone: {}", data.timezone);

    for page in &report.pages {
        let _ = writeln!(output);
        if report.pages.len() > 1 {
            let _ = writeln!(output, "Page {} of {}", page.index + 1, report.pages.len());
        }
        let _ = writeln!(
            output,
            "{:<10}  {:<4} {:<8} {:>5} {:>5} {:>8} {:>8} {:>9} {:>9} {:>6}",
            "Date", "Day", "", "Start", "End", "Work", "Breaks", "Odo start", "Odo end", "Km"
        );
        for row in page.rows.iter().filter(|row| row.kind != DayKind::Padding) {
            format_row(&mut output, row, tz);
        }
    }

    let totals = &report.totals;
    let _ = writeln!(output);
    let _ = writeln!(output, "Totals");
    let _ = writeln!(
        output,
        "  Days:     {} worked, {} vacation, {} sick",
        totals.worked_days, totals.vacation_days, totals.sick_days
    );
    let _ = writeln!(output, "  Net work: {}", format_duration(totals.net_work_ms));
    let _ = writeln!(output, "  Breaks:   {}", format_duration(totals.break_ms));
    let _ = writeln!(
        output,
        "  Overtime: {}",
        format_signed_duration(totals.overtime_ms)
    );
    let _ = writeln!(output, "  Driven:   {} km", totals.driven_km);
    output
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData) -> Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    user_id: &UserId,
    period: Period,
    expected_daily_ms: i64,
    json: bool,
) -> Result<()> {
    db.refresh()?;
    let generated_at = Utc::now();
    let today = generated_at.with_timezone(&Local).date_naive();
    let range = resolve_period(period, today)?;

    let options = ReportOptions {
        expected_daily_ms,
        ..ReportOptions::new(Local)
    };
    let data = generate_report_data(db, user_id, range, &options, generated_at)?;

    if json {
        writeln!(writer, "{}", format_report_json(&data)?)?;
    } else {
        write!(writer, "{}", format_report(&data, &Local))?;
    }
    Ok(())
}
