//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use fl_core::{EventType, PaymentMethod};

use crate::commands::util::parse_datetime;

/// Driver work-time tracker.
///
/// Records workday, break, refuel, loading and absence events, derives
/// working time from them, and uploads them to the fleet backend.
#[derive(Debug, Parser)]
#[command(name = "fl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Record an event.
    Event(EventArgs),

    /// Rewrite a recorded event. Fields not given keep their stored values;
    /// it will be uploaded again.
    Edit {
        /// Local event id, as shown by `fl events`.
        id: i64,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Delete a recorded event.
    Delete {
        /// Local event id.
        id: i64,
    },

    /// List recorded events.
    Events {
        /// Only events at or after this time (ISO 8601 or relative, e.g. '2 days ago').
        #[arg(long, value_parser = parse_datetime)]
        from: Option<DateTime<Utc>>,

        /// Only events before this time.
        #[arg(long, value_parser = parse_datetime)]
        to: Option<DateTime<Utc>>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the live workday state.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a work-time report.
    Report(ReportArgs),

    /// Detect loading stops from location samples read as JSON lines on stdin.
    Track {
        /// Upload new events in the background while tracking.
        #[arg(long)]
        sync: bool,
    },

    /// Upload unsynced events to the backend.
    Sync,
}

/// Fields of a recorded event.
#[derive(Debug, Clone, Args)]
pub struct EventArgs {
    /// Event type, e.g. `work_start`, `break_end`, `refuel`, `vacation`.
    pub event_type: EventType,

    /// When the event happened (ISO 8601 or relative). Defaults to now.
    #[arg(long, value_parser = parse_datetime)]
    pub at: Option<DateTime<Utc>>,

    /// Odometer reading in km.
    #[arg(long)]
    pub odometer: Option<i64>,

    /// Latitude of the event location.
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude of the event location.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Street address of the event location.
    #[arg(long, requires = "lat")]
    pub address: Option<String>,

    /// Fuel type for refuel events.
    #[arg(long, requires_all = ["fuel_litres", "payment"])]
    pub fuel_type: Option<String>,

    /// Litres refuelled.
    #[arg(long, requires = "fuel_type")]
    pub fuel_litres: Option<f64>,

    /// Payment method: cash, card or fuel_card.
    #[arg(long, requires = "fuel_type")]
    pub payment: Option<PaymentMethod>,

    /// Last day covered by a vacation or sick leave (YYYY-MM-DD).
    #[arg(long)]
    pub until: Option<NaiveDate>,
}

/// Report period selection.
#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// First day of the report (YYYY-MM-DD).
    #[arg(long, requires = "to", conflicts_with_all = ["week", "last_week", "weeks"])]
    pub from: Option<NaiveDate>,

    /// Last day of the report (YYYY-MM-DD).
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Report the current week (default).
    #[arg(long, conflicts_with_all = ["last_week", "weeks"])]
    pub week: bool,

    /// Report the previous week.
    #[arg(long, conflicts_with = "weeks")]
    pub last_week: bool,

    /// Report the last N weeks, ending with the current one.
    #[arg(long)]
    pub weeks: Option<u32>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}
