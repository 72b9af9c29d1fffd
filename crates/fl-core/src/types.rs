//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Latitude or longitude outside the valid range.
    #[error("coordinates out of range: ({latitude}, {longitude})")]
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },

    /// A quantity that must not be negative was negative.
    #[error("{field} cannot be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    /// Invalid payment method value.
    #[error("invalid payment method: {value}")]
    InvalidPaymentMethod { value: String },

    /// A payload field was supplied for an event type that does not carry it.
    #[error("{field} is not allowed on {event_type} events")]
    FieldNotAllowed {
        field: &'static str,
        event_type: &'static str,
    },
}

/// How a refuel was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    FuelCard,
}

impl PaymentMethod {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::FuelCard => "fuel_card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "fuel_card" | "fuel-card" => Ok(Self::FuelCard),
            _ => Err(ValidationError::InvalidPaymentMethod {
                value: s.to_string(),
            }),
        }
    }
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated user identifier.
    ///
    /// Every event belongs to exactly one user; the device is the only writer
    /// of its user's events.
    UserId, "user ID"
);

define_string_id!(
    /// Identifier assigned by the backend after a successful upload.
    RemoteId, "remote ID"
);

/// A GPS fix, optionally resolved to a street address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    /// Creates a location after range validation.
    pub fn new(
        latitude: f64,
        longitude: f64,
        address: Option<String>,
    ) -> Result<Self, ValidationError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(ValidationError::CoordinatesOutOfRange {
                latitude,
                longitude,
            });
        }
        let address = address.filter(|a| !a.trim().is_empty());
        Ok(Self {
            latitude,
            longitude,
            address,
        })
    }
}

/// Refuel payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefuelDetails {
    pub fuel_type: String,
    pub litres: f64,
    pub payment_method: PaymentMethod,
}

impl RefuelDetails {
    pub fn new(
        fuel_type: impl Into<String>,
        litres: f64,
        payment_method: PaymentMethod,
    ) -> Result<Self, ValidationError> {
        let fuel_type = fuel_type.into();
        if fuel_type.trim().is_empty() {
            return Err(ValidationError::Empty { field: "fuel type" });
        }
        if litres.is_nan() || litres < 0.0 {
            return Err(ValidationError::Negative {
                field: "fuel amount",
                value: litres,
            });
        }
        Ok(Self {
            fuel_type,
            litres,
            payment_method,
        })
    }
}
