//! Record, edit and delete events.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use fl_core::{EventType, Location, NewEvent, RefuelDetails, UserId};
use fl_db::Database;

use crate::cli::EventArgs;

/// Builds an event from command-line fields.
///
/// `at` defaults to `now` when the arguments carry no timestamp.
pub fn build(user_id: UserId, args: &EventArgs, now: DateTime<Utc>) -> Result<NewEvent> {
    let event = from_args(user_id, args, now)?;
    event.validate().context("invalid event")?;
    Ok(event)
}

/// Applies edit arguments over a stored event.
///
/// Fields not given keep their stored values as long as the (possibly new)
/// event type allows them.
pub fn merge(existing: &NewEvent, user_id: UserId, args: &EventArgs) -> Result<NewEvent> {
    let mut event = from_args(user_id, args, existing.timestamp)?;
    event.odometer_km = event.odometer_km.or(existing.odometer_km);
    if event.location.is_none() {
        event.location.clone_from(&existing.location);
    }
    if event.event_type == EventType::Refuel && event.refuel.is_none() {
        event.refuel.clone_from(&existing.refuel);
    }
    if event.event_type.is_absence() && event.until.is_none() {
        event.until = existing.until;
    }
    event.validate().context("invalid event")?;
    Ok(event)
}

fn from_args(user_id: UserId, args: &EventArgs, now: DateTime<Utc>) -> Result<NewEvent> {
    let mut event = NewEvent::new(user_id, args.event_type, args.at.unwrap_or(now));

    if let Some(odometer) = args.odometer {
        event = event.with_odometer(odometer);
    }
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        let location = Location::new(lat, lon, args.address.clone()).context("invalid location")?;
        event = event.with_location(location);
    }
    if let (Some(fuel_type), Some(litres), Some(payment)) =
        (&args.fuel_type, args.fuel_litres, args.payment)
    {
        let refuel = RefuelDetails::new(fuel_type.clone(), litres, payment)
            .context("invalid refuel details")?;
        event = event.with_refuel(refuel);
    }
    if let Some(until) = args.until {
        event = event.with_until(until);
    }
    Ok(event)
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Records a new event.
pub fn record<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user_id: UserId,
    args: &EventArgs,
) -> Result<i64> {
    let event = build(user_id, args, Utc::now())?;
    let id = db.insert(&event).context("failed to record event")?;
    writeln!(
        writer,
        "Recorded {} #{id} at {}",
        event.event_type,
        local_time(event.timestamp)
    )?;
    Ok(id)
}

/// Rewrites an event. Without `--at` the original timestamp is kept, and
/// other fields not given are kept too (see [`merge`]).
pub fn edit<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user_id: UserId,
    id: i64,
    args: &EventArgs,
) -> Result<()> {
    let existing = db
        .get(id)?
        .with_context(|| format!("event #{id} not found"))?;
    let event = merge(&existing.data, user_id, args)?;
    db.update(id, &event)
        .with_context(|| format!("failed to update event #{id}"))?;
    writeln!(
        writer,
        "Updated #{id}: {} at {}",
        event.event_type,
        local_time(event.timestamp)
    )?;
    Ok(())
}

/// Deletes an event.
pub fn delete<W: Write>(writer: &mut W, db: &mut Database, id: i64) -> Result<()> {
    if !db.delete(id)? {
        anyhow::bail!("event #{id} not found");
    }
    writeln!(writer, "Deleted #{id}")?;
    Ok(())
}
