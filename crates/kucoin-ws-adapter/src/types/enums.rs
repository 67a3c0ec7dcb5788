/*
[INPUT]:  Canonical candle interval strings and KuCoin topic suffixes
[OUTPUT]: Typed CandleInterval with both vocabularies and bar duration
[POS]:    Data layer - interval mapping shared by topics and routing
[UPDATE]: When the venue adds or renames candle granularities
*/

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::http::KucoinError;

/// Candle granularities supported by the market stream.
///
/// The canonical form (`1m`, `1h`, ...) is what callers use and what appears
/// in emitted event names. The venue form (`1min`, `1hour`, ...) only ever
/// appears inside topic strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandleInterval {
    OneMinute,
    ThreeMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    OneWeek,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 12] = [
        CandleInterval::OneMinute,
        CandleInterval::ThreeMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::ThirtyMinutes,
        CandleInterval::OneHour,
        CandleInterval::TwoHours,
        CandleInterval::FourHours,
        CandleInterval::SixHours,
        CandleInterval::EightHours,
        CandleInterval::TwelveHours,
        CandleInterval::OneDay,
        CandleInterval::OneWeek,
    ];

    pub fn canonical(self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::ThreeMinutes => "3m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::ThirtyMinutes => "30m",
            CandleInterval::OneHour => "1h",
            CandleInterval::TwoHours => "2h",
            CandleInterval::FourHours => "4h",
            CandleInterval::SixHours => "6h",
            CandleInterval::EightHours => "8h",
            CandleInterval::TwelveHours => "12h",
            CandleInterval::OneDay => "1d",
            CandleInterval::OneWeek => "1w",
        }
    }

    pub fn venue(self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1min",
            CandleInterval::ThreeMinutes => "3min",
            CandleInterval::FifteenMinutes => "15min",
            CandleInterval::ThirtyMinutes => "30min",
            CandleInterval::OneHour => "1hour",
            CandleInterval::TwoHours => "2hour",
            CandleInterval::FourHours => "4hour",
            CandleInterval::SixHours => "6hour",
            CandleInterval::EightHours => "8hour",
            CandleInterval::TwelveHours => "12hour",
            CandleInterval::OneDay => "1day",
            CandleInterval::OneWeek => "1week",
        }
    }

    /// Length of one bar.
    pub fn duration(self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        let secs = match self {
            CandleInterval::OneMinute => MINUTE,
            CandleInterval::ThreeMinutes => 3 * MINUTE,
            CandleInterval::FifteenMinutes => 15 * MINUTE,
            CandleInterval::ThirtyMinutes => 30 * MINUTE,
            CandleInterval::OneHour => HOUR,
            CandleInterval::TwoHours => 2 * HOUR,
            CandleInterval::FourHours => 4 * HOUR,
            CandleInterval::SixHours => 6 * HOUR,
            CandleInterval::EightHours => 8 * HOUR,
            CandleInterval::TwelveHours => 12 * HOUR,
            CandleInterval::OneDay => 24 * HOUR,
            CandleInterval::OneWeek => 7 * 24 * HOUR,
        };
        Duration::from_secs(secs)
    }

    /// Parse the canonical vocabulary (`1m`, `4h`, ...).
    pub fn from_canonical(value: &str) -> Result<Self, KucoinError> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.canonical() == value)
            .ok_or_else(|| KucoinError::UnsupportedInterval {
                interval: value.to_string(),
                expected: Self::canonical_list(),
            })
    }

    /// Reverse-map the venue vocabulary (`1min`, `4hour`, ...).
    pub fn from_venue(value: &str) -> Result<Self, KucoinError> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.venue() == value)
            .ok_or_else(|| KucoinError::UnknownVenueInterval(value.to_string()))
    }

    fn canonical_list() -> String {
        Self::ALL
            .iter()
            .map(|interval| interval.canonical())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl FromStr for CandleInterval {
    type Err = KucoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_canonical(s)
    }
}

impl Serialize for CandleInterval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.canonical())
    }
}

impl<'de> Deserialize<'de> for CandleInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::from_canonical(&raw).map_err(serde::de::Error::custom)
    }
}
