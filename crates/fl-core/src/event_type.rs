//! Event type enum as the single source of truth for event type strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical workday event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkStart,
    WorkEnd,
    BreakStart,
    BreakEnd,
    Refuel,
    LoadingStart,
    LoadingEnd,
    Vacation,
    SickLeave,
}

/// Event types that open and close an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalKind {
    Work,
    Break,
    Loading,
}

impl IntervalKind {
    /// The event type that opens this interval.
    pub const fn start(self) -> EventType {
        match self {
            Self::Work => EventType::WorkStart,
            Self::Break => EventType::BreakStart,
            Self::Loading => EventType::LoadingStart,
        }
    }

    /// The event type that closes this interval.
    pub const fn end(self) -> EventType {
        match self {
            Self::Work => EventType::WorkEnd,
            Self::Break => EventType::BreakEnd,
            Self::Loading => EventType::LoadingEnd,
        }
    }
}

impl EventType {
    pub const ALL: [Self; 9] = [
        Self::WorkStart,
        Self::WorkEnd,
        Self::BreakStart,
        Self::BreakEnd,
        Self::Refuel,
        Self::LoadingStart,
        Self::LoadingEnd,
        Self::Vacation,
        Self::SickLeave,
    ];

    /// String representation for database storage and the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WorkStart => "work_start",
            Self::WorkEnd => "work_end",
            Self::BreakStart => "break_start",
            Self::BreakEnd => "break_end",
            Self::Refuel => "refuel",
            Self::LoadingStart => "loading_start",
            Self::LoadingEnd => "loading_end",
            Self::Vacation => "vacation",
            Self::SickLeave => "sick_leave",
        }
    }

    /// Whether this event marks a whole-day absence.
    pub const fn is_absence(self) -> bool {
        matches!(self, Self::Vacation | Self::SickLeave)
    }

    /// Whether this event is uploaded to the workday endpoint.
    pub const fn is_workday_event(self) -> bool {
        matches!(
            self,
            Self::WorkStart
                | Self::WorkEnd
                | Self::BreakStart
                | Self::BreakEnd
                | Self::Vacation
                | Self::SickLeave
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work_start" | "WORK_START" => Ok(Self::WorkStart),
            "work_end" | "WORK_END" => Ok(Self::WorkEnd),
            "break_start" | "BREAK_START" => Ok(Self::BreakStart),
            "break_end" | "BREAK_END" => Ok(Self::BreakEnd),
            "refuel" | "REFUEL" => Ok(Self::Refuel),
            "loading_start" | "LOADING_START" => Ok(Self::LoadingStart),
            "loading_end" | "LOADING_END" => Ok(Self::LoadingEnd),
            "vacation" | "VACATION" => Ok(Self::Vacation),
            "sick_leave" | "SICK_LEAVE" => Ok(Self::SickLeave),
            _ => Err(UnknownEventType(s.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown event type strings.
#[derive(Debug, Clone)]
pub struct UnknownEventType(String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}
