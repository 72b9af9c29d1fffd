//! Location samples and speed derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Location, ValidationError};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A raw location fix as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed reported by the platform, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl LocationSample {
    /// The validated position of this fix.
    pub fn location(&self) -> Result<Location, ValidationError> {
        Location::new(self.latitude, self.longitude, self.address.clone())
    }
}

/// A speed observation consumed by the loading detector.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedSample {
    pub timestamp: DateTime<Utc>,
    pub speed_kmh: f64,
    pub location: Option<Location>,
}

/// Great-circle distance between two coordinates.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Turns a stream of location fixes into speed samples.
///
/// Uses the platform speed when present, otherwise the distance to the
/// previous fix over the elapsed time. The first fix without a platform
/// speed yields nothing, as do fixes that do not move forward in time.
#[derive(Debug, Default)]
pub struct SpeedEstimator {
    previous: Option<LocationSample>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, sample: LocationSample) -> Option<SpeedSample> {
        let location = match sample.location() {
            Ok(location) => Some(location),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring invalid location fix");
                return None;
            }
        };

        let reported = sample.speed_kmh.filter(|s| s.is_finite() && *s >= 0.0);
        let speed_kmh = reported.or_else(|| {
            let previous = self.previous.as_ref()?;
            let elapsed_ms = (sample.timestamp - previous.timestamp).num_milliseconds();
            if elapsed_ms <= 0 {
                return None;
            }
            let km = haversine_km(
                (previous.latitude, previous.longitude),
                (sample.latitude, sample.longitude),
            );
            #[allow(clippy::cast_precision_loss)]
            let hours = elapsed_ms as f64 / 3_600_000.0;
            Some(km / hours)
        });

        let timestamp = sample.timestamp;
        // Out-of-order fixes never become the reference point.
        if self
            .previous
            .as_ref()
            .is_none_or(|p| p.timestamp < timestamp)
        {
            self.previous = Some(sample);
        }

        speed_kmh.map(|speed_kmh| SpeedSample {
            timestamp,
            speed_kmh,
            location,
        })
    }
}
