//! 캔들 간격과 통계 기간 정의.
//!
//! 거래소 와이어 문자열("1m", "4h", "1M" 등)과 상호 변환됩니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 86_400_000;

/// 캔들스틱 간격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandleInterval {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 3분봉
    #[serde(rename = "3m")]
    M3,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 2시간봉
    #[serde(rename = "2h")]
    H2,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 6시간봉
    #[serde(rename = "6h")]
    H6,
    /// 8시간봉
    #[serde(rename = "8h")]
    H8,
    /// 12시간봉
    #[serde(rename = "12h")]
    H12,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
    /// 3일봉
    #[serde(rename = "3d")]
    D3,
    /// 주봉
    #[serde(rename = "1w")]
    W1,
    /// 월봉
    #[serde(rename = "1M")]
    MN1,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 15] = [
        CandleInterval::M1,
        CandleInterval::M3,
        CandleInterval::M5,
        CandleInterval::M15,
        CandleInterval::M30,
        CandleInterval::H1,
        CandleInterval::H2,
        CandleInterval::H4,
        CandleInterval::H6,
        CandleInterval::H8,
        CandleInterval::H12,
        CandleInterval::D1,
        CandleInterval::D3,
        CandleInterval::W1,
        CandleInterval::MN1,
    ];

    /// 와이어 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::M1 => "1m",
            CandleInterval::M3 => "3m",
            CandleInterval::M5 => "5m",
            CandleInterval::M15 => "15m",
            CandleInterval::M30 => "30m",
            CandleInterval::H1 => "1h",
            CandleInterval::H2 => "2h",
            CandleInterval::H4 => "4h",
            CandleInterval::H6 => "6h",
            CandleInterval::H8 => "8h",
            CandleInterval::H12 => "12h",
            CandleInterval::D1 => "1d",
            CandleInterval::D3 => "3d",
            CandleInterval::W1 => "1w",
            CandleInterval::MN1 => "1M",
        }
    }

    /// 한 캔들의 길이 (밀리초). 월봉은 30일로 근사합니다.
    pub fn duration_ms(&self) -> i64 {
        match self {
            CandleInterval::M1 => MINUTE_MS,
            CandleInterval::M3 => MINUTE_MS * 3,
            CandleInterval::M5 => MINUTE_MS * 5,
            CandleInterval::M15 => MINUTE_MS * 15,
            CandleInterval::M30 => MINUTE_MS * 30,
            CandleInterval::H1 => MINUTE_MS * 60,
            CandleInterval::H2 => MINUTE_MS * 120,
            CandleInterval::H4 => MINUTE_MS * 240,
            CandleInterval::H6 => MINUTE_MS * 360,
            CandleInterval::H8 => MINUTE_MS * 480,
            CandleInterval::H12 => MINUTE_MS * 720,
            CandleInterval::D1 => DAY_MS,
            CandleInterval::D3 => DAY_MS * 3,
            CandleInterval::W1 => DAY_MS * 7,
            CandleInterval::MN1 => DAY_MS * 30,
        }
    }

    /// 분 단위 해상도에서 간격을 찾습니다.
    ///
    /// 월봉은 고정 분 값이 없으므로 대응하지 않습니다.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(CandleInterval::M1),
            3 => Some(CandleInterval::M3),
            5 => Some(CandleInterval::M5),
            15 => Some(CandleInterval::M15),
            30 => Some(CandleInterval::M30),
            60 => Some(CandleInterval::H1),
            120 => Some(CandleInterval::H2),
            240 => Some(CandleInterval::H4),
            360 => Some(CandleInterval::H6),
            480 => Some(CandleInterval::H8),
            720 => Some(CandleInterval::H12),
            1440 => Some(CandleInterval::D1),
            4320 => Some(CandleInterval::D3),
            10080 => Some(CandleInterval::W1),
            _ => None,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput(format!("Invalid candle interval: {}", s)))
    }
}

/// 선물 통계 엔드포인트의 집계 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticsPeriod {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl StatisticsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticsPeriod::M5 => "5m",
            StatisticsPeriod::M15 => "15m",
            StatisticsPeriod::M30 => "30m",
            StatisticsPeriod::H1 => "1h",
            StatisticsPeriod::H2 => "2h",
            StatisticsPeriod::H4 => "4h",
            StatisticsPeriod::H6 => "6h",
            StatisticsPeriod::H12 => "12h",
            StatisticsPeriod::D1 => "1d",
        }
    }
}

impl fmt::Display for StatisticsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
