//! REST 응답 모델.
//!
//! 연결 계층이 직접 다루는 레코드만 정의합니다:
//! 거래소 메타데이터, 에러 응답, 페이지네이션 대상 시계열 레코드.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// 거래소 에러 응답 본문.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub msg: String,
}

/// 요청 한도 설명자.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    /// REQUEST_WEIGHT, ORDERS 등
    pub rate_limit_type: String,
    /// SECOND, MINUTE, DAY 등
    pub interval: String,
    pub interval_num: u32,
    pub limit: u32,
}

/// 심볼 메타데이터.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymbolInfo {
    pub symbol: String,
    pub pair: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub margin_asset: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub base_asset_precision: u32,
    pub quote_precision: u32,
}

/// 정밀도 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionKind {
    Quantity,
    Price,
    Quote,
}

impl SymbolInfo {
    pub fn precision(&self, kind: PrecisionKind) -> u32 {
        match kind {
            PrecisionKind::Quantity => self.quantity_precision,
            PrecisionKind::Price => self.price_precision,
            PrecisionKind::Quote => self.quote_precision,
        }
    }
}

/// `exchangeInfo` 응답.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangeInfo {
    pub rate_limits: Vec<RateLimit>,
    pub symbols: Vec<SymbolInfo>,
    pub server_time: i64,
    pub timezone: String,
}

impl ExchangeInfo {
    /// 심볼 이름으로 검색합니다 (대소문자 구분).
    pub fn find_symbol(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

/// `time` 응답.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// 과거 캔들.
///
/// 와이어에서는 12개 원소 배열로 전달됩니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_volume: Decimal,
    pub number_of_trades: i64,
    pub taker_buy_volume: Decimal,
    pub taker_quote_volume: Decimal,
}

type CandleRow = (
    i64,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    i64,
    Decimal,
    i64,
    Decimal,
    Decimal,
    serde_json::Value,
);

impl<'de> Deserialize<'de> for Candle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let row = CandleRow::deserialize(deserializer)?;
        Ok(Candle {
            open_time: row.0,
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            volume: row.5,
            close_time: row.6,
            quote_volume: row.7,
            number_of_trades: row.8,
            taker_buy_volume: row.9,
            taker_quote_volume: row.10,
        })
    }
}

/// 펀딩 비율 기록.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: String,
    pub funding_rate: Decimal,
    pub funding_time: i64,
}

/// 미결제약정 통계.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestStatistics {
    pub symbol: String,
    pub sum_open_interest: Decimal,
    pub sum_open_interest_value: Decimal,
    #[serde(deserialize_with = "i64_from_str_or_num")]
    pub timestamp: i64,
}

/// 롱/숏 계정 비율.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LongShortRatio {
    pub symbol: String,
    pub long_short_ratio: Decimal,
    pub long_account: Decimal,
    pub short_account: Decimal,
    #[serde(deserialize_with = "i64_from_str_or_num")]
    pub timestamp: i64,
}

/// 테이커 매수/매도 거래량.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuySellVolume {
    pub buy_sell_ratio: Decimal,
    pub buy_vol: Decimal,
    pub sell_vol: Decimal,
    #[serde(deserialize_with = "i64_from_str_or_num")]
    pub timestamp: i64,
}

/// 선물 통계 엔드포인트는 타임스탬프를 문자열 또는 숫자로 보낸다.
fn i64_from_str_or_num<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
