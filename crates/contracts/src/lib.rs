//! Cross-boundary contracts for the economy engine, facade, and CLI.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opening price used on first run or when a carried-over series is unreadable.
pub const BASE_PRICE: i64 = 1000;
/// Number of simulated intraday steps; a day's series holds `PRICE_STEPS + 1` values.
pub const PRICE_STEPS: usize = 96;
/// Coins credited by a successful daily claim.
pub const DAILY_REWARD: i64 = 600;
/// Slots in the cringe-meter progress bar.
pub const METER_SLOTS: usize = 25;

/// Per-member ledger state. Reads are lenient: a missing or malformed field
/// decodes to its zero default so one corrupted counter never poisons the
/// rest of the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberRecord {
    #[serde(default, deserialize_with = "serde_lenient::int_or_zero")]
    pub coins: i64,
    #[serde(default, deserialize_with = "serde_lenient::int_or_zero")]
    pub shares: i64,
    #[serde(default, deserialize_with = "serde_lenient::float_or_zero")]
    pub cringe_meter: f64,
    #[serde(default, deserialize_with = "serde_lenient::string_or_none")]
    pub prev_daily: Option<String>,
    #[serde(default, deserialize_with = "serde_lenient::flag_or_zero")]
    pub on_expedition: u8,
}

impl Default for MemberRecord {
    fn default() -> Self {
        Self {
            coins: 0,
            shares: 0,
            cringe_meter: 0.0,
            prev_daily: None,
            on_expedition: 0,
        }
    }
}

impl MemberRecord {
    pub fn is_on_expedition(&self) -> bool {
        self.on_expedition != 0
    }

    pub fn set_on_expedition(&mut self, busy: bool) {
        self.on_expedition = u8::from(busy);
    }
}

/// One calendar day's asset price path plus the date it was generated for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceSeries {
    #[serde(default)]
    pub prev_check: String,
    #[serde(default)]
    pub values: Vec<i64>,
}

impl PriceSeries {
    /// A series without values cannot be priced against; callers regenerate.
    pub fn is_readable(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn closing_value(&self) -> Option<i64> {
        self.values.last().copied()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExpeditionTier {
    Short,
    Normal,
    Long,
}

impl ExpeditionTier {
    pub const ALL: [ExpeditionTier; 3] = [Self::Short, Self::Normal, Self::Long];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Normal => "normal",
            Self::Long => "long",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(10),
            Self::Normal => Duration::from_secs(30),
            Self::Long => Duration::from_secs(90),
        }
    }

    pub fn reward(self) -> i64 {
        match self {
            Self::Short => 100,
            Self::Normal => 250,
            Self::Long => 700,
        }
    }
}

impl fmt::Display for ExpeditionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTier(pub String);

impl fmt::Display for UnknownTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid = Self::valid_list();
        write!(f, "unknown expedition tier '{}' (valid: {valid})", self.0)
    }
}

impl std::error::Error for UnknownTier {}

impl UnknownTier {
    pub fn valid_list() -> String {
        ExpeditionTier::ALL
            .iter()
            .map(|tier| tier.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for ExpeditionTier {
    type Err = UnknownTier;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "short" => Ok(Self::Short),
            "normal" => Ok(Self::Normal),
            "long" => Ok(Self::Long),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Opaque handle to a rendered chart, produced by an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartHandle(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceView {
    pub guild_id: String,
    pub member_id: String,
    pub coins: i64,
    pub shares: i64,
    pub unit_price: i64,
    /// Coins plus shares valued at the current unit price.
    pub combined_worth: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSummary {
    pub date: String,
    pub opening_value: i64,
    pub current_value: i64,
    pub difference: i64,
    pub percent_change: f64,
    pub chart: Option<ChartHandle>,
}

impl fmt::Display for MarketSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: value={} ({:+} / {:+.2}%)",
            self.date,
            self.current_value,
            self.difference,
            self.percent_change * 100.0
        )
    }
}

const METER_STATUSES: [&str; 5] = ["Not Cringe", "Kinda Cringe", "Cringe", "Ultra Cringe", "YASH"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CringeView {
    pub member_id: String,
    pub value: f64,
    pub status: String,
    pub bar: String,
}

impl CringeView {
    pub fn from_value(member_id: impl Into<String>, value: f64) -> Self {
        let clamped = value.clamp(0.0, 1.0);
        let filled = (clamped * METER_SLOTS as f64).floor() as usize;
        let bar = format!(
            "{}% [{}{}]",
            (clamped * 100.0) as u32,
            "#".repeat(filled),
            "-".repeat(METER_SLOTS - filled),
        );
        Self {
            member_id: member_id.into(),
            value: clamped,
            status: meter_status(clamped).to_string(),
            bar,
        }
    }
}

fn meter_status(value: f64) -> &'static str {
    if value == 0.69 {
        return "Nice";
    }
    METER_STATUSES[(value * (METER_STATUSES.len() - 1) as f64) as usize]
}

pub mod serde_lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn int_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Value::deserialize(deserializer)?.as_i64().unwrap_or(0))
    }

    pub fn float_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Value::deserialize(deserializer)?.as_f64().unwrap_or(0.0))
    }

    pub fn flag_or_zero<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flag = match Value::deserialize(deserializer)? {
            Value::Bool(raw) => u8::from(raw),
            other => u8::from(other.as_i64().unwrap_or(0) != 0),
        };
        Ok(flag)
    }

    pub fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = match Value::deserialize(deserializer)? {
            Value::String(raw) => Some(raw),
            _ => None,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_record_tolerates_malformed_fields() {
        let raw = serde_json::json!({
            "coins": "definitely not a number",
            "shares": 4,
            "cringe_meter": null,
            "on_expedition": true,
        });

        let record: MemberRecord = serde_json::from_value(raw).expect("lenient decode");
        assert_eq!(record.coins, 0);
        assert_eq!(record.shares, 4);
        assert_eq!(record.cringe_meter, 0.0);
        assert!(record.is_on_expedition());
        assert_eq!(record.prev_daily, None);
    }

    #[test]
    fn tier_parse_round_trip() {
        for tier in ExpeditionTier::ALL {
            assert_eq!(tier.as_str().parse::<ExpeditionTier>(), Ok(tier));
        }
        assert!("epic".parse::<ExpeditionTier>().is_err());
    }

    #[test]
    fn meter_status_exact_nice() {
        let view = CringeView::from_value("m", 0.69);
        assert_eq!(view.status, "Nice");

        let top = CringeView::from_value("m", 1.0);
        assert_eq!(top.status, "YASH");
        let bottom = CringeView::from_value("m", 0.0);
        assert_eq!(bottom.status, "Not Cringe");
    }
}
