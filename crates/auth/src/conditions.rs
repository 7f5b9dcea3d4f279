//! Conditional constraints attached to grants.
//!
//! The set of condition types is closed; each record carries exactly one.
//! See [`crate::evaluator`] for how they are checked.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::context::LatLng;
use crate::grants::GrantRef;

/// One constraint on a grant. Multiple conditions on a grant are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum Condition {
    Time(TimeWindow),
    Location(LocationRule),
    Device(DeviceRule),
    IpRange(IpRangeRule),
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Time(_) => "time",
            Condition::Location(_) => "location",
            Condition::Device(_) => "device",
            Condition::IpRange(_) => "ip_range",
        }
    }
}

/// Time-of-day window `[start, end)` in an IANA timezone.
///
/// `start > end` wraps around midnight. An empty `days` list allows every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub days: Vec<Weekday>,
    pub timezone: String,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: impl Into<String>) -> Self {
        Self {
            start,
            end,
            days: Vec::new(),
            timezone: timezone.into(),
        }
    }

    pub fn on_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days = days.into_iter().collect();
        self
    }
}

/// Geographic restriction: a geofence polygon, or allow-lists of place names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRule {
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    /// When present, takes precedence over the allow-lists.
    #[serde(default)]
    pub geofence: Option<Vec<LatLng>>,
}

impl LocationRule {
    pub fn countries<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn geofence(polygon: Vec<LatLng>) -> Self {
        Self {
            geofence: Some(polygon),
            ..Self::default()
        }
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cities<I, S>(mut self, cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cities = cities.into_iter().map(Into::into).collect();
        self
    }
}

/// Device restriction. Empty allow-lists do not restrict that attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRule {
    #[serde(default)]
    pub device_types: Vec<String>,
    #[serde(default)]
    pub operating_systems: Vec<String>,
    #[serde(default)]
    pub corporate_device_only: bool,
}

/// Allowed client address ranges in CIDR notation (bare addresses allowed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRangeRule {
    pub cidrs: Vec<String>,
}

impl IpRangeRule {
    pub fn new<I, S>(cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cidrs: cidrs.into_iter().map(Into::into).collect(),
        }
    }
}

/// A condition as stored, attached to a grant at role, user (scope),
/// delegation or organization level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub grant: GrantRef,
    pub condition: Condition,
    pub active: bool,
}

impl ConditionRecord {
    pub fn new(grant: GrantRef, condition: Condition) -> Self {
        Self {
            grant,
            condition,
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_serialize_with_type_tag() {
        let cond = Condition::IpRange(IpRangeRule::new(["10.0.0.0/8"]));
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["condition_type"], "ip_range");
        assert_eq!(json["cidrs"][0], "10.0.0.0/8");
    }

    #[test]
    fn time_window_deserializes_from_store_shape() {
        let json = serde_json::json!({
            "condition_type": "time",
            "start": "09:00:00",
            "end": "17:00:00",
            "days": ["Mon", "Tue"],
            "timezone": "America/Los_Angeles"
        });
        let cond: Condition = serde_json::from_value(json).unwrap();
        match cond {
            Condition::Time(w) => {
                assert_eq!(w.days, vec![Weekday::Mon, Weekday::Tue]);
                assert_eq!(w.timezone, "America/Los_Angeles");
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn kind_names_match_wire_tags() {
        let cond = Condition::Device(DeviceRule::default());
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["condition_type"], cond.kind());
    }
}
