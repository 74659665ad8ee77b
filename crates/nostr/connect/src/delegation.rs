//! Delegation conditions with relative time horizons.
//!
//! Relative tokens are turned into absolute timestamps when the conditions are
//! resolved, so every `delegate` call sees fresh horizons.

use std::fmt;
use std::str::FromStr;

use nostr::Conditions;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectError, Result};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "5mins")]
    FiveMins,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "1week")]
    OneWeek,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "1year")]
    OneYear,
}

impl TimeRange {
    pub const ALL: [TimeRange; 6] = [
        TimeRange::FiveMins,
        TimeRange::OneHour,
        TimeRange::OneDay,
        TimeRange::OneWeek,
        TimeRange::OneMonth,
        TimeRange::OneYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::FiveMins => "5mins",
            TimeRange::OneHour => "1hour",
            TimeRange::OneDay => "1day",
            TimeRange::OneWeek => "1week",
            TimeRange::OneMonth => "1month",
            TimeRange::OneYear => "1year",
        }
    }

    /// Length of the horizon. A month is 30 days and a year 365.
    pub fn seconds(self) -> u64 {
        match self {
            TimeRange::FiveMins => 5 * MINUTE,
            TimeRange::OneHour => HOUR,
            TimeRange::OneDay => DAY,
            TimeRange::OneWeek => 7 * DAY,
            TimeRange::OneMonth => 30 * DAY,
            TimeRange::OneYear => 365 * DAY,
        }
    }
}

impl FromStr for TimeRange {
    type Err = ConnectError;

    fn from_str(value: &str) -> Result<Self> {
        TimeRange::ALL
            .into_iter()
            .find(|range| range.as_str() == value)
            .ok_or_else(|| {
                ConnectError::InvalidCondition(format!(
                    "'{value}' is neither a timestamp nor a valid time range"
                ))
            })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `since`/`until` bound: absolute Unix seconds or a horizon from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    At(u64),
    In(TimeRange),
}

impl TimeBound {
    pub fn resolve(self, now: u64) -> u64 {
        match self {
            TimeBound::At(timestamp) => timestamp,
            TimeBound::In(range) => now.saturating_add(range.seconds()),
        }
    }
}

impl FromStr for TimeBound {
    type Err = ConnectError;

    fn from_str(value: &str) -> Result<Self> {
        match value.parse::<u64>() {
            Ok(timestamp) => Ok(TimeBound::At(timestamp)),
            Err(_) => value.parse().map(TimeBound::In),
        }
    }
}

impl From<u64> for TimeBound {
    fn from(timestamp: u64) -> Self {
        TimeBound::At(timestamp)
    }
}

impl From<TimeRange> for TimeBound {
    fn from(range: TimeRange) -> Self {
        TimeBound::In(range)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<TimeBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<TimeBound>,
}

impl DelegationConditions {
    /// Absolute conditions as of `now`.
    pub fn resolve(&self, now: u64) -> Result<Conditions> {
        let conditions = Conditions {
            kind: self.kind,
            since: self.since.map(|bound| bound.resolve(now)),
            until: self.until.map(|bound| bound.resolve(now)),
        };
        conditions
            .validate()
            .map_err(|error| ConnectError::InvalidCondition(error.to_string()))?;
        Ok(conditions)
    }
}
