//! Shared scan type metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which liquidity grab detector to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Three-bar swing low, 0.5% touch tolerance, close back above
    Classic,
    /// Swing + volume + wick + depth + context scoring with grades
    #[default]
    Scored,
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classic" | "v1" => Ok(Engine::Classic),
            "scored" | "v2" => Ok(Engine::Scored),
            other => Err(format!("unknown engine: {other} (expected classic | scored)")),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Classic => write!(f, "classic"),
            Engine::Scored => write!(f, "scored"),
        }
    }
}

/// Candle interval of a cached series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "4h")]
    FourHour,
}

impl Timeframe {
    /// Interval token used in cache file names
    pub fn interval(&self) -> &'static str {
        match self {
            Timeframe::Daily => "1d",
            Timeframe::FourHour => "4h",
        }
    }

    /// Interval requested from the quote provider (4h is built from hourly bars)
    pub fn fetch_interval(&self) -> &'static str {
        match self {
            Timeframe::Daily => "1d",
            Timeframe::FourHour => "1h",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Daily => "1D",
            Timeframe::FourHour => "4H",
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" | "d" | "daily" => Ok(Timeframe::Daily),
            "4h" | "h4" => Ok(Timeframe::FourHour),
            other => Err(format!("unsupported timeframe: {other} (expected 1d | 4h)")),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interval())
    }
}

/// Signal quality bucket derived from the total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    B,
    C,
    D,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::APlus => "A+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub id: Engine,
    pub name: String,
    pub description: String,
    pub params: Vec<ScanParam>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanParam {
    pub name: String,
    pub param_type: String,
    pub default: serde_json::Value,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parses_aliases() {
        assert_eq!("v1".parse::<Engine>().unwrap(), Engine::Classic);
        assert_eq!(" Scored ".parse::<Engine>().unwrap(), Engine::Scored);
        assert!("fast".parse::<Engine>().is_err());
    }

    #[test]
    fn timeframe_tokens() {
        let tf: Timeframe = "4H".parse().unwrap();
        assert_eq!(tf.interval(), "4h");
        assert_eq!(tf.fetch_interval(), "1h");
        assert_eq!(tf.label(), "4H");
        assert_eq!(Timeframe::Daily.to_string(), "1d");
    }

    #[test]
    fn grade_serializes_with_plus() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(Grade::B.to_string(), "B");
    }
}
