//! Request-side inputs of a decision: the target resource and the caller's
//! context as reported by the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use accord_core::OrgId;

/// Target resource of a check. Absent for resource-agnostic checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Resolved place names for the caller (e.g. from a GeoIP lookup).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Everything the engine knows about the caller at decision time.
///
/// All fields except `now` are optional; conditions needing a missing field
/// fail closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub now: DateTime<Utc>,
    /// Client address as reported by the transport (unparsed).
    pub ip: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<String>,
    pub corporate_device: bool,
    pub geo: Option<LatLng>,
    pub location: Option<GeoLocation>,
    pub org_id: Option<OrgId>,
}

impl RequestContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ip: None,
            device_type: None,
            os: None,
            corporate_device: false,
            geo: None,
            location: None,
            org_id: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_device(mut self, device_type: impl Into<String>, os: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self.os = Some(os.into());
        self
    }

    pub fn with_corporate_device(mut self, corporate: bool) -> Self {
        self.corporate_device = corporate;
        self
    }

    pub fn with_geo(mut self, geo: LatLng) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_location(mut self, location: GeoLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }
}
