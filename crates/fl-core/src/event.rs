//! Workday events as recorded on the device.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_type::EventType;
use crate::types::{Location, RefuelDetails, RemoteId, UserId, ValidationError};

/// An event ready to be written to the store.
///
/// Events are created by a user action or by the loading heuristic and are
/// persisted immediately. `client_id` is generated once and survives
/// rewrites, so the backend can recognise a re-sent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub client_id: String,
    pub user_id: UserId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odometer_km: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuel: Option<RefuelDetails>,
    /// Last covered day (inclusive) for vacation and sick leave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDate>,
}

impl NewEvent {
    pub fn new(user_id: UserId, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            user_id,
            event_type,
            timestamp,
            odometer_km: None,
            location: None,
            refuel: None,
            until: None,
        }
    }

    #[must_use]
    pub const fn with_odometer(mut self, odometer_km: i64) -> Self {
        self.odometer_km = Some(odometer_km);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_refuel(mut self, refuel: RefuelDetails) -> Self {
        self.refuel = Some(refuel);
        self
    }

    #[must_use]
    pub const fn with_until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }

    /// Checks that payload fields match the event type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(odometer) = self.odometer_km {
            if odometer < 0 {
                #[allow(clippy::cast_precision_loss)]
                return Err(ValidationError::Negative {
                    field: "odometer",
                    value: odometer as f64,
                });
            }
        }
        if self.refuel.is_some() && self.event_type != EventType::Refuel {
            return Err(ValidationError::FieldNotAllowed {
                field: "refuel details",
                event_type: self.event_type.as_str(),
            });
        }
        if self.until.is_some() && !self.event_type.is_absence() {
            return Err(ValidationError::FieldNotAllowed {
                field: "until",
                event_type: self.event_type.as_str(),
            });
        }
        Ok(())
    }
}

/// An event as stored, with its store-assigned sequence and sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned sequence; breaks timestamp ties.
    pub id: i64,
    #[serde(flatten)]
    pub data: NewEvent,
    /// Set only by the sync worker.
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Bumped by every rewrite; pins an upload to the version it sent.
    #[serde(skip)]
    pub version: i64,
}

/// An event that can be placed on a timeline.
///
/// Lets the reconstructor and the aggregator run over stored events and
/// lightweight test fixtures alike.
pub trait TimedEvent {
    /// When the event occurred.
    fn timestamp(&self) -> DateTime<Utc>;

    /// The kind of event.
    fn event_type(&self) -> EventType;

    /// Insertion order, used to break timestamp ties.
    fn sequence(&self) -> i64;

    /// Odometer reading attached to the event, if any.
    fn odometer_km(&self) -> Option<i64> {
        None
    }

    /// Last covered day for absences.
    fn until(&self) -> Option<NaiveDate> {
        None
    }
}

impl TimedEvent for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        self.data.timestamp
    }

    fn event_type(&self) -> EventType {
        self.data.event_type
    }

    fn sequence(&self) -> i64 {
        self.id
    }

    fn odometer_km(&self) -> Option<i64> {
        self.data.odometer_km
    }

    fn until(&self) -> Option<NaiveDate> {
        self.data.until
    }
}

impl<E: TimedEvent + ?Sized> TimedEvent for &E {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }

    fn event_type(&self) -> EventType {
        (**self).event_type()
    }

    fn sequence(&self) -> i64 {
        (**self).sequence()
    }

    fn odometer_km(&self) -> Option<i64> {
        (**self).odometer_km()
    }

    fn until(&self) -> Option<NaiveDate> {
        (**self).until()
    }
}

/// Returns the events in processing order: timestamp, then insertion order.
pub fn chronological<E: TimedEvent>(events: &[E]) -> Vec<&E> {
    let mut ordered: Vec<&E> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.sequence().cmp(&b.sequence()))
    });
    ordered
}
