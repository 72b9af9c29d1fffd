//! Events command for listing recorded events.
//!
//! Prints one line per event in processing order, or JSONL with `--json`.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use fl_core::{Event, UserId};
use fl_db::Database;

use super::util::{local_offset, or_dash};

fn details(event: &Event) -> String {
    let data = &event.data;
    let mut parts = Vec::new();
    if let Some(odometer) = data.odometer_km {
        parts.push(format!("odo {odometer} km"));
    }
    if let Some(refuel) = &data.refuel {
        parts.push(format!(
            "{} {:.1} l {}",
            refuel.fuel_type, refuel.litres, refuel.payment_method
        ));
    }
    if let Some(until) = data.until {
        parts.push(format!("until {until}"));
    }
    if let Some(location) = &data.location {
        let place = location.address.clone().unwrap_or_else(|| {
            format!("{:.5}, {:.5}", location.latitude, location.longitude)
        });
        parts.push(format!("@ {place}"));
    }
    parts.join("  ")
}

/// Formats events as a table in the given offset.
pub fn format_events(events: &[Event], offset: FixedOffset) -> String {
    let mut output = String::new();
    if events.is_empty() {
        output.push_str("No events recorded.\n");
        return output;
    }

    for event in events {
        let sync_state = if event.synced {
            format!("synced {}", or_dash(event.remote_id.as_ref()))
        } else {
            "pending".to_string()
        };
        let _ = writeln!(
            output,
            "#{:<5} {}  {:<13} {:<12} {}",
            event.id,
            event.data.timestamp.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
            event.data.event_type.as_str(),
            sync_state,
            details(event)
        );
    }
    output
}

/// Runs the events command.
pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    user_id: &UserId,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    json: bool,
) -> Result<()> {
    let mut events = db.list_events(user_id, None)?;
    events.retain(|event| {
        let at = event.data.timestamp;
        from.is_none_or(|from| at >= from) && to.is_none_or(|to| at < to)
    });

    if json {
        for event in &events {
            writeln!(writer, "{}", serde_json::to_string(event)?)?;
        }
    } else {
        write!(writer, "{}", format_events(&events, local_offset()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Offset, TimeZone};
    use fl_core::{EventType, Location, NewEvent, PaymentMethod, RefuelDetails, RemoteId};
    use insta::assert_snapshot;

    fn user() -> UserId {
        UserId::new("driver-1").unwrap()
    }

    fn event(id: i64, event_type: EventType, hour: u32) -> Event {
        Event {
            id,
            data: NewEvent::new(
                user(),
                event_type,
                Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap(),
            ),
            synced: false,
            remote_id: None,
            version: 0,
        }
    }

    #[test]
    fn test_format_empty() {
        assert_snapshot!(format_events(&[], Utc.fix()), @"No events recorded.");
    }

    #[test]
    fn test_format_events_table() {
        let mut start = event(1, EventType::WorkStart, 7);
        start.data.odometer_km = Some(1200);
        start.synced = true;
        start.remote_id = Some(RemoteId::new("srv-7").unwrap());

        let mut refuel = event(2, EventType::Refuel, 10);
        refuel.data.refuel = Some(RefuelDetails::new("diesel", 60.0, PaymentMethod::FuelCard).unwrap());
        refuel.data.location = Some(Location::new(52.52, 13.405, Some("Berlin".to_string())).unwrap());

        let mut vacation = event(3, EventType::Vacation, 12);
        vacation.data.until = NaiveDate::from_ymd_opt(2025, 1, 20);

        let output = format_events(&[start, refuel, vacation], Utc.fix());
        assert_snapshot!(output, @r"
        #1     2025-01-15 07:00  work_start    synced srv-7 odo 1200 km
        #2     2025-01-15 10:00  refuel        pending      diesel 60.0 l fuel_card  @ Berlin
        #3     2025-01-15 12:00  vacation      pending      until 2025-01-20
        ");
    }

    #[test]
    fn test_format_uses_offset() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let output = format_events(&[event(1, EventType::WorkStart, 23)], offset);
        assert!(output.contains("2025-01-16 00:00"));
    }

    #[test]
    fn test_run_json_lines() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert(&event(0, EventType::WorkStart, 7).data).unwrap();
        db.insert(&event(0, EventType::WorkEnd, 15).data).unwrap();

        let mut out = Vec::new();
        run(&mut out, &db, &user(), None, None, true).unwrap();

        let output = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "work_start");
        assert_eq!(lines[1]["event_type"], "work_end");
    }

    #[test]
    fn test_run_range_is_half_open() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert(&event(0, EventType::WorkStart, 7).data).unwrap();
        db.insert(&event(0, EventType::WorkEnd, 15).data).unwrap();

        let mut out = Vec::new();
        let to = Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 0).unwrap();
        run(&mut out, &db, &user(), None, Some(to), true).unwrap();

        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
