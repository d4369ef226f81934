use guestlink_core::{BridgeError, CallGate, FrameContext, Operation};
use serde::{Deserialize, Serialize};

use crate::map::Map;

pub(crate) const CONTEXTS: &[FrameContext] = &[FrameContext::Content, FrameContext::Task];
pub(crate) const CAPABILITY: &[&str] = &["geoLocation"];

const GET_LOCATION: Operation = Operation {
    method: "location.getLocation",
    contexts: CONTEXTS,
    capability: Some(CAPABILITY),
};

const HAS_PERMISSION: Operation = Operation {
    method: "permissions.has",
    contexts: CONTEXTS,
    capability: Some(CAPABILITY),
};

const REQUEST_PERMISSION: Operation = Operation {
    method: "permissions.request",
    contexts: CONTEXTS,
    capability: Some(CAPABILITY),
};

/// Coordinates reported by (or sent to) the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            timestamp: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(BridgeError::InvalidArguments(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(BridgeError::InvalidArguments(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        if let Some(accuracy) = self.accuracy
            && (!accuracy.is_finite() || accuracy < 0.0)
        {
            return Err(BridgeError::InvalidArguments(format!(
                "accuracy {accuracy} must be a non-negative number"
            )));
        }
        Ok(())
    }
}

/// Device permissions the host can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePermission {
    #[serde(rename = "geolocation")]
    GeoLocation,
    Media,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocationRequest {
    pub allow_choose_location: bool,
    pub show_map: bool,
}

/// Location and location-permission operations.
#[derive(Clone)]
pub struct GeoLocation {
    gate: CallGate,
}

impl GeoLocation {
    pub fn new(gate: CallGate) -> Self {
        Self { gate }
    }

    /// Whether the host supports geolocation at all.
    pub fn is_supported(&self) -> bool {
        self.gate.is_supported(CAPABILITY)
    }

    /// The user's current coordinates.
    pub async fn get_current_location(&self) -> Result<Location, BridgeError> {
        tracing::debug!("Requesting current location");
        let request = LocationRequest {
            allow_choose_location: false,
            show_map: false,
        };
        self.gate.invoke_operation(&GET_LOCATION, &request).await
    }

    /// Whether the user already granted location access.
    pub async fn has_permission(&self) -> Result<bool, BridgeError> {
        self.gate
            .invoke_operation(&HAS_PERMISSION, &DevicePermission::GeoLocation)
            .await
    }

    /// Ask the user for location access. Resolves to whether it was granted.
    pub async fn request_permission(&self) -> Result<bool, BridgeError> {
        tracing::debug!("Requesting location permission");
        self.gate
            .invoke_operation(&REQUEST_PERMISSION, &DevicePermission::GeoLocation)
            .await
    }

    /// Map operations, gated on `geoLocation.map`.
    pub fn map(&self) -> Map {
        Map::new(self.gate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_request_wire_shape() {
        let request = LocationRequest {
            allow_choose_location: true,
            show_map: false,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"allowChooseLocation": true, "showMap": false})
        );
    }

    #[test]
    fn permission_serializes_as_plain_string() {
        assert_eq!(
            serde_json::to_value(DevicePermission::GeoLocation).unwrap(),
            serde_json::json!("geolocation")
        );
        assert_eq!(
            serde_json::to_value(DevicePermission::Media).unwrap(),
            serde_json::json!("media")
        );
    }

    #[test]
    fn location_parses_without_optional_fields() {
        let location: Location =
            serde_json::from_value(serde_json::json!({"latitude": 1.5, "longitude": -2.0}))
                .unwrap();
        assert_eq!(location, Location::new(1.5, -2.0));
    }

    #[test]
    fn validation_rejects_out_of_range_coordinates() {
        assert!(Location::new(47.6, -122.3).validate().is_ok());
        assert!(Location::new(91.0, 0.0).validate().is_err());
        assert!(Location::new(0.0, -180.5).validate().is_err());
        assert!(Location::new(f64::NAN, 0.0).validate().is_err());

        let mut negative_accuracy = Location::new(0.0, 0.0);
        negative_accuracy.accuracy = Some(-1.0);
        assert!(matches!(
            negative_accuracy.validate(),
            Err(BridgeError::InvalidArguments(_))
        ));
    }
}
