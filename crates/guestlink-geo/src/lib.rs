//! Geolocation feature module.
//!
//! Every operation is one [`CallGate`](guestlink_core::CallGate) invocation:
//! the gate checks that the guest runs in a content or task frame and that the
//! host advertised `geoLocation` (or `geoLocation.map`), then forwards the
//! request.

pub mod location;
pub mod map;

pub use location::{DevicePermission, GeoLocation, Location};
pub use map::Map;
