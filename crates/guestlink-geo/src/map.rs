use guestlink_core::{BridgeError, CallGate, Operation};

use crate::location::{CONTEXTS, Location, LocationRequest};

const CAPABILITY: &[&str] = &["geoLocation", "map"];

const CHOOSE_LOCATION: Operation = Operation {
    method: "location.getLocation",
    contexts: CONTEXTS,
    capability: Some(CAPABILITY),
};

const SHOW_LOCATION: Operation = Operation {
    method: "location.showLocation",
    contexts: CONTEXTS,
    capability: Some(CAPABILITY),
};

/// Map-based location operations.
#[derive(Clone)]
pub struct Map {
    gate: CallGate,
}

impl Map {
    pub fn new(gate: CallGate) -> Self {
        Self { gate }
    }

    pub fn is_supported(&self) -> bool {
        self.gate.is_supported(CAPABILITY)
    }

    /// Let the user pick a location on a map. Resolves once the map closes.
    pub async fn choose_location(&self) -> Result<Location, BridgeError> {
        let request = LocationRequest {
            allow_choose_location: true,
            show_map: true,
        };
        self.gate.invoke_operation(&CHOOSE_LOCATION, &request).await
    }

    /// Show `location` on a map. Resolves once the map closes.
    pub async fn show_location(&self, location: &Location) -> Result<(), BridgeError> {
        // Gate failures take precedence over argument errors.
        let context = self.gate.check(
            SHOW_LOCATION.method,
            SHOW_LOCATION.contexts,
            SHOW_LOCATION.capability,
        )?;
        location.validate()?;

        let reply = self
            .gate
            .issue_checked(context, SHOW_LOCATION.method, location)
            .await?;
        self.gate.wait(reply).await?;
        Ok(())
    }
}
