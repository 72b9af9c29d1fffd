//! Status command for showing the live workday state.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use fl_core::{IntervalKind, Reconstruction, UserId, reconstruct};
use fl_db::Database;
use serde::Serialize;

use super::util::{format_duration, local_offset, start_of_day};

/// Live state derived from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusData {
    pub generated_at: DateTime<Utc>,
    pub workday_active: bool,
    pub on_break: bool,
    /// Net work since the start of the local day, or since the open
    /// workday began if that was earlier.
    pub work_ms: i64,
    pub break_ms: i64,
    pub working_since: Option<DateTime<Utc>>,
    pub break_since: Option<DateTime<Utc>>,
    pub loading_since: Option<DateTime<Utc>>,
    pub unsynced: usize,
}

impl StatusData {
    fn from_reconstruction(
        generated_at: DateTime<Utc>,
        reconstruction: &Reconstruction,
        loading_since: Option<DateTime<Utc>>,
        unsynced: usize,
    ) -> Self {
        Self {
            generated_at,
            workday_active: reconstruction.workday_active,
            on_break: reconstruction.is_break_open,
            work_ms: reconstruction.work_ms,
            break_ms: reconstruction.break_ms,
            working_since: reconstruction.work_open_since,
            break_since: reconstruction.break_open_since,
            loading_since,
            unsynced,
        }
    }
}

/// Derives the live state at `now`.
pub fn collect(
    db: &Database,
    user_id: &UserId,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<StatusData> {
    let today = now.with_timezone(&offset).date_naive();
    let mut start = start_of_day(today, offset);
    // An overnight shift keeps counting from where it began.
    for kind in [IntervalKind::Work, IntervalKind::Break] {
        if let Some(open) = db.open_event(user_id, kind)? {
            start = start.min(open.data.timestamp);
        }
    }
    let end = now.max(start) + Duration::milliseconds(1);

    let events: Vec<_> = db
        .list_events(user_id, Some((start, end)))?
        .into_iter()
        .filter(|event| !event.data.event_type.is_absence())
        .collect();
    let reconstruction = reconstruct(&events, Some(now));
    tracing::debug!(
        events = events.len(),
        work_ms = reconstruction.work_ms,
        "reconstructed status"
    );

    let loading_since = db
        .open_event(user_id, IntervalKind::Loading)?
        .map(|event| event.data.timestamp);
    let unsynced = db.list_unsynced(Some(user_id))?.len();

    Ok(StatusData::from_reconstruction(
        now,
        &reconstruction,
        loading_since,
        unsynced,
    ))
}

/// Formats the status for humans.
pub fn format_status(data: &StatusData, offset: FixedOffset) -> String {
    let clock = |at: DateTime<Utc>| at.with_timezone(&offset).format("%H:%M").to_string();
    let elapsed = |at: DateTime<Utc>| format_duration((data.generated_at - at).num_milliseconds());
    let mut output = String::new();

    let workday = if data.workday_active {
        "active"
    } else {
        "inactive"
    };
    let _ = writeln!(output, "Workday:  {workday}");

    if let Some(since) = data.break_since {
        let _ = writeln!(output, "State:    on break since {} ({})", clock(since), elapsed(since));
    } else if let Some(since) = data.working_since {
        let _ = writeln!(output, "State:    working since {} ({})", clock(since), elapsed(since));
    } else {
        let _ = writeln!(output, "State:    off duty");
    }

    let _ = writeln!(output, "Work:     {}", format_duration(data.work_ms));
    let _ = writeln!(output, "Breaks:   {}", format_duration(data.break_ms));

    match data.loading_since {
        Some(since) => {
            let _ = writeln!(output, "Loading:  since {} ({})", clock(since), elapsed(since));
        }
        None => {
            let _ = writeln!(output, "Loading:  -");
        }
    }

    if data.unsynced > 0 {
        let _ = writeln!(output, "Unsynced: {} event(s)", data.unsynced);
    }
    output
}

/// Runs the status command.
pub fn run<W: Write>(writer: &mut W, db: &Database, user_id: &UserId, json: bool) -> Result<()> {
    db.refresh()?;
    let offset = local_offset();
    let data = collect(db, user_id, Utc::now(), offset)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&data)?)?;
    } else {
        write!(writer, "{}", format_status(&data, offset))?;
    }
    Ok(())
}
