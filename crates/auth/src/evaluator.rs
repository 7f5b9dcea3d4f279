//! Condition evaluation.
//!
//! Fail-closed throughout: a condition that cannot be evaluated because the
//! context is missing or malformed, or because the condition itself is not
//! evaluable, does **not** pass. It is never skipped.

use std::net::IpAddr;

use chrono::{Datelike, Weekday};
use chrono_tz::Tz;
use ipnet::IpNet;
use serde::Serialize;
use thiserror::Error;

use crate::conditions::{Condition, DeviceRule, IpRangeRule, LocationRule, TimeWindow};
use crate::context::{LatLng, RequestContext};
use crate::grants::Candidate;

/// Why a condition did not pass.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConditionFailure {
    #[error("missing context field '{0}'")]
    MissingContext(&'static str),

    #[error("malformed context field '{0}'")]
    MalformedContext(&'static str),

    #[error("condition cannot be evaluated: {0}")]
    MalformedCondition(String),

    #[error("outside allowed time window")]
    OutsideTimeWindow,

    #[error("day {0} not allowed")]
    DayNotAllowed(String),

    #[error("outside geofence")]
    OutsideGeofence,

    #[error("{0} not allowed")]
    LocationNotAllowed(&'static str),

    #[error("device type not allowed")]
    DeviceNotAllowed,

    #[error("operating system not allowed")]
    OsNotAllowed,

    #[error("corporate device required")]
    CorporateDeviceRequired,

    #[error("address outside allowed ranges")]
    IpNotAllowed,
}

/// Result of one condition, kept for decision traces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionVerdict {
    pub condition: Condition,
    pub failure: Option<ConditionFailure>,
}

impl ConditionVerdict {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Whether every condition attached to `candidate` passes for `ctx`.
///
/// A candidate without conditions passes.
pub fn passes(candidate: &Candidate, ctx: &RequestContext) -> bool {
    evaluate_all(&candidate.conditions, ctx).is_ok()
}

/// AND over `conditions`, stopping at the first failure.
pub fn evaluate_all(conditions: &[Condition], ctx: &RequestContext) -> Result<(), ConditionFailure> {
    conditions.iter().try_for_each(|c| evaluate(c, ctx))
}

/// Evaluate every condition without short-circuiting.
pub fn verdicts(conditions: &[Condition], ctx: &RequestContext) -> Vec<ConditionVerdict> {
    conditions
        .iter()
        .map(|c| ConditionVerdict {
            condition: c.clone(),
            failure: evaluate(c, ctx).err(),
        })
        .collect()
}

pub fn evaluate(condition: &Condition, ctx: &RequestContext) -> Result<(), ConditionFailure> {
    match condition {
        Condition::Time(window) => evaluate_time(window, ctx),
        Condition::Location(rule) => evaluate_location(rule, ctx),
        Condition::Device(rule) => evaluate_device(rule, ctx),
        Condition::IpRange(rule) => evaluate_ip(rule, ctx),
    }
}

fn evaluate_time(window: &TimeWindow, ctx: &RequestContext) -> Result<(), ConditionFailure> {
    let tz: Tz = window.timezone.parse().map_err(|_| {
        ConditionFailure::MalformedCondition(format!("unknown timezone '{}'", window.timezone))
    })?;
    if window.start == window.end {
        return Err(ConditionFailure::MalformedCondition(
            "empty time window".to_string(),
        ));
    }

    let local = ctx.now.with_timezone(&tz);
    let day: Weekday = local.weekday();
    if !window.days.is_empty() && !window.days.contains(&day) {
        return Err(ConditionFailure::DayNotAllowed(day.to_string()));
    }

    let t = local.time();
    let inside = if window.start < window.end {
        window.start <= t && t < window.end
    } else {
        // Crosses midnight.
        t >= window.start || t < window.end
    };

    if inside {
        Ok(())
    } else {
        Err(ConditionFailure::OutsideTimeWindow)
    }
}

fn evaluate_location(rule: &LocationRule, ctx: &RequestContext) -> Result<(), ConditionFailure> {
    if let Some(polygon) = &rule.geofence {
        if polygon.len() < 3 || !polygon.iter().all(LatLng::is_valid) {
            return Err(ConditionFailure::MalformedCondition(
                "geofence needs at least three valid vertices".to_string(),
            ));
        }
        let point = ctx.geo.ok_or(ConditionFailure::MissingContext("geo"))?;
        if !point.is_valid() {
            return Err(ConditionFailure::MalformedContext("geo"));
        }
        return if point_in_polygon(point, polygon) {
            Ok(())
        } else {
            Err(ConditionFailure::OutsideGeofence)
        };
    }

    if rule.countries.is_empty() && rule.regions.is_empty() && rule.cities.is_empty() {
        return Err(ConditionFailure::MalformedCondition(
            "location condition has no constraints".to_string(),
        ));
    }

    let location = ctx
        .location
        .as_ref()
        .ok_or(ConditionFailure::MissingContext("location"))?;
    check_allowed(&rule.countries, location.country.as_deref(), "country")?;
    check_allowed(&rule.regions, location.region.as_deref(), "region")?;
    check_allowed(&rule.cities, location.city.as_deref(), "city")
}

fn check_allowed(allowed: &[String], actual: Option<&str>, field: &'static str) -> Result<(), ConditionFailure> {
    if allowed.is_empty() {
        return Ok(());
    }
    let actual = actual
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConditionFailure::MissingContext(field))?;
    if allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(actual)) {
        Ok(())
    } else {
        Err(ConditionFailure::LocationNotAllowed(field))
    }
}

/// Ray casting with longitude as x and latitude as y.
fn point_in_polygon(point: LatLng, polygon: &[LatLng]) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let x = (b.lng - a.lng) * (point.lat - a.lat) / (b.lat - a.lat) + a.lng;
            if point.lng < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn evaluate_device(rule: &DeviceRule, ctx: &RequestContext) -> Result<(), ConditionFailure> {
    if rule.device_types.is_empty() && rule.operating_systems.is_empty() && !rule.corporate_device_only {
        return Err(ConditionFailure::MalformedCondition(
            "device condition has no constraints".to_string(),
        ));
    }

    if !rule.device_types.is_empty() {
        let device = present(ctx.device_type.as_deref(), "device_type")?;
        if !rule.device_types.iter().any(|d| d.eq_ignore_ascii_case(device)) {
            return Err(ConditionFailure::DeviceNotAllowed);
        }
    }

    if !rule.operating_systems.is_empty() {
        let os = present(ctx.os.as_deref(), "os")?;
        if !rule.operating_systems.iter().any(|o| o.eq_ignore_ascii_case(os)) {
            return Err(ConditionFailure::OsNotAllowed);
        }
    }

    if rule.corporate_device_only && !ctx.corporate_device {
        return Err(ConditionFailure::CorporateDeviceRequired);
    }

    Ok(())
}

fn present<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ConditionFailure> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConditionFailure::MissingContext(field))
}

fn evaluate_ip(rule: &IpRangeRule, ctx: &RequestContext) -> Result<(), ConditionFailure> {
    let raw = present(ctx.ip.as_deref(), "ip")?;
    let addr: IpAddr = raw
        .parse()
        .map_err(|_| ConditionFailure::MalformedContext("ip"))?;
    let addr = addr.to_canonical();

    let ranges = parse_ranges(&rule.cidrs);
    if ranges.is_empty() {
        return Err(ConditionFailure::MalformedCondition(
            "no valid address ranges".to_string(),
        ));
    }

    if ranges.iter().any(|net| net.contains(&addr)) {
        Ok(())
    } else {
        Err(ConditionFailure::IpNotAllowed)
    }
}

/// Unparseable entries are dropped; they can never match.
fn parse_ranges(cidrs: &[String]) -> Vec<IpNet> {
    cidrs
        .iter()
        .filter_map(|raw| {
            let raw = raw.trim();
            raw.parse::<IpNet>()
                .ok()
                .or_else(|| raw.parse::<IpAddr>().ok().map(IpNet::from))
        })
        .collect()
}
