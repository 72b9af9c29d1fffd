//! Core domain logic for fleetlog.
//!
//! This crate contains the fundamental types and logic for:
//! - Events: workday, break, refuel, loading and absence records
//! - Reconstruction: deriving work and break timers from events
//! - Loading detection: promoting sustained stops to loading intervals
//! - Reports: per-day rows, pages and totals over a date range

pub mod event;
pub mod event_type;
pub mod loading;
pub mod location;
mod reconstruct;
pub mod report;
pub mod types;

pub use event::{Event, NewEvent, TimedEvent, chronological};
pub use event_type::{EventType, IntervalKind, UnknownEventType};
pub use loading::{
    DetectorState, LoadingConfig, LoadingDetector, LoadingTransition, WorkdayContext, detect,
};
pub use location::{LocationSample, SpeedEstimator, SpeedSample, haversine_km};
pub use reconstruct::{Reconstruction, Segment, open_event, reconstruct};
pub use report::{DayKind, DayRow, Page, Report, ReportOptions, ReportTotals, aggregate, week_range};
pub use types::{Location, PaymentMethod, RefuelDetails, RemoteId, UserId, ValidationError};
