//! WebSocket 푸시 이벤트 모델.
//!
//! 스트림 세션이 전달하는 JSON 객체를 타입으로 변환합니다.
//! 필드 이름은 거래소 와이어 형식의 한 글자 키를 그대로 따릅니다.

use connector_core::CandleInterval;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExchangeResult;

/// 이벤트 공통 헤더 (`e`, `E`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventHeader {
    /// 이벤트 종류
    #[serde(rename = "e", default)]
    pub event_type: String,
    /// 이벤트 시각 (밀리초)
    #[serde(rename = "E", default)]
    pub event_time: i64,
}

/// 최우선 호가 이벤트 (`bookTicker`).
///
/// 스트림 매니저에 저장될 때 수량 필드는 누적값으로 사용됩니다.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EventTickPrice {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    /// 호가창 업데이트 ID
    #[serde(rename = "u", default)]
    pub update_id: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// 최우선 매수 호가
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    /// 매수 잔량
    #[serde(rename = "B")]
    pub bid_qty: Decimal,
    /// 최우선 매도 호가
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    /// 매도 잔량
    #[serde(rename = "A")]
    pub ask_qty: Decimal,
    /// 체결 시각
    #[serde(rename = "T", default)]
    pub transaction_time: i64,
}

impl EventTickPrice {
    /// 새 푸시를 병합합니다.
    ///
    /// 가격, ID, 시각은 최신 값으로 덮어쓰고 수량은 더합니다.
    pub fn merge(&mut self, update: &EventTickPrice) {
        self.event_type.clone_from(&update.event_type);
        self.event_time = update.event_time;
        self.update_id = update.update_id;
        self.transaction_time = update.transaction_time;
        self.bid_price = update.bid_price;
        self.ask_price = update.ask_price;
        self.bid_qty += update.bid_qty;
        self.ask_qty += update.ask_qty;
    }

    /// 누적 수량을 0으로 초기화합니다.
    pub fn reset_quantities(&mut self) {
        self.bid_qty = Decimal::ZERO;
        self.ask_qty = Decimal::ZERO;
    }
}

/// 캔들 본문 (`k`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candlestick {
    /// 캔들 시작 시각
    #[serde(rename = "t")]
    pub start_time: i64,
    /// 캔들 종료 시각
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub interval: CandleInterval,
    #[serde(rename = "f", default)]
    pub first_trade_id: i64,
    #[serde(rename = "L", default)]
    pub last_trade_id: i64,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    /// 기준 자산 거래량
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "n", default)]
    pub number_of_trades: i64,
    /// 캔들 마감 여부
    #[serde(rename = "x", default)]
    pub is_closed: bool,
    /// 호가 자산 거래량
    #[serde(rename = "q", default)]
    pub quote_volume: Decimal,
    #[serde(rename = "V", default)]
    pub taker_buy_base_volume: Decimal,
    #[serde(rename = "Q", default)]
    pub taker_buy_quote_volume: Decimal,
}

/// 캔들 이벤트 (`kline`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventCandlestick {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub candle: Candlestick,
}

/// 주문 체결 업데이트 (`ORDER_TRADE_UPDATE`의 `o` 객체).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventOrderUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "f")]
    pub time_in_force: String,
    #[serde(rename = "q")]
    pub original_quantity: Decimal,
    #[serde(rename = "p")]
    pub original_price: Decimal,
    #[serde(rename = "ap")]
    pub average_price: Decimal,
    #[serde(rename = "sp")]
    pub stop_price: Decimal,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "l")]
    pub last_filled_quantity: Decimal,
    #[serde(rename = "z")]
    pub filled_accumulated_quantity: Decimal,
    #[serde(rename = "L")]
    pub last_filled_price: Decimal,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "b")]
    pub bids_notional: Decimal,
    #[serde(rename = "a")]
    pub ask_notional: Decimal,
    #[serde(rename = "m")]
    pub is_maker: bool,
    #[serde(rename = "R")]
    pub is_reduce_only: bool,
    #[serde(rename = "wt")]
    pub working_type: String,
    #[serde(rename = "ot")]
    pub original_order_type: String,
    #[serde(rename = "ps")]
    pub position_side: String,
    #[serde(rename = "cp")]
    pub close_all: bool,
    #[serde(rename = "AP")]
    pub activation_price: Decimal,
    #[serde(rename = "cr")]
    pub callback_rate: Decimal,
    #[serde(rename = "rp")]
    pub realized_profit: Decimal,
}

/// 계정 업데이트. 본문은 해석하지 않고 보관합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAccountUpdate {
    pub event_time: i64,
    pub payload: Value,
}

/// 잔고/설정 업데이트. 본문은 해석하지 않고 보관합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBalanceUpdate {
    pub event_time: i64,
    pub payload: Value,
}

/// 스트림 푸시 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TickPrice(EventTickPrice),
    AccountUpdate(EventAccountUpdate),
    BalanceUpdate(EventBalanceUpdate),
    OrderUpdate(Box<EventOrderUpdate>),
    /// 처리하지 않는 이벤트 (`listenKeyExpired` 등)
    Generic(EventHeader),
}

impl StreamEvent {
    /// `e` 판별자로 이벤트를 분류합니다.
    ///
    /// 알 수 없는 판별자나 본문이 없는 사용자 데이터 이벤트는 `Generic`이 됩니다.
    pub fn from_value(value: &Value) -> ExchangeResult<Self> {
        let header = EventHeader::deserialize(value)?;

        let event = match header.event_type.as_str() {
            "bookTicker" => StreamEvent::TickPrice(EventTickPrice::deserialize(value)?),
            "ORDER_TRADE_UPDATE" => match value.get("o") {
                Some(order) => {
                    StreamEvent::OrderUpdate(Box::new(EventOrderUpdate::deserialize(order)?))
                }
                None => StreamEvent::Generic(header),
            },
            "ACCOUNT_CONFIG_UPDATE" => match value.get("a") {
                Some(payload) => StreamEvent::BalanceUpdate(EventBalanceUpdate {
                    event_time: header.event_time,
                    payload: payload.clone(),
                }),
                None => StreamEvent::Generic(header),
            },
            "ACCOUNT_UPDATE" => match value.get("ac") {
                Some(payload) => StreamEvent::AccountUpdate(EventAccountUpdate {
                    event_time: header.event_time,
                    payload: payload.clone(),
                }),
                None => StreamEvent::Generic(header),
            },
            _ => StreamEvent::Generic(header),
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn book_ticker(bid_qty: &str, ask_qty: &str, update_id: i64) -> Value {
        json!({
            "e": "bookTicker",
            "u": update_id,
            "E": 1568014460893i64,
            "T": 1568014460891i64,
            "s": "BTCUSDT",
            "b": "25.35190000",
            "B": bid_qty,
            "a": "25.36520000",
            "A": ask_qty
        })
    }

    #[test]
    fn test_parse_book_ticker() {
        let tick: EventTickPrice = serde_json::from_value(book_ticker("31.21", "40.66", 400900217)).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.bid_price, dec!(25.35190000));
        assert_eq!(tick.bid_qty, dec!(31.21));
        assert_eq!(tick.ask_qty, dec!(40.66));
        assert_eq!(tick.update_id, 400900217);
        assert_eq!(tick.transaction_time, 1568014460891);
    }

    #[test]
    fn test_tick_merge_accumulates_quantities() {
        let mut stored: EventTickPrice = serde_json::from_value(book_ticker("1.5", "2", 1)).unwrap();
        let mut update: EventTickPrice = serde_json::from_value(book_ticker("0.25", "3", 2)).unwrap();
        update.bid_price = dec!(26);

        stored.merge(&update);

        assert_eq!(stored.bid_qty, dec!(1.75));
        assert_eq!(stored.ask_qty, dec!(5));
        assert_eq!(stored.bid_price, dec!(26));
        assert_eq!(stored.update_id, 2);

        stored.reset_quantities();
        assert_eq!(stored.bid_qty, Decimal::ZERO);
        assert_eq!(stored.ask_qty, Decimal::ZERO);
        assert_eq!(stored.bid_price, dec!(26));
    }

    #[test]
    fn test_parse_kline() {
        let value = json!({
            "e": "kline",
            "E": 1638747660000i64,
            "s": "BTCUSDT",
            "k": {
                "t": 1638747660000i64,
                "T": 1638747719999i64,
                "s": "BTCUSDT",
                "i": "1m",
                "f": 100,
                "L": 200,
                "o": "0.0010",
                "c": "0.0020",
                "h": "0.0025",
                "l": "0.0015",
                "v": "1000",
                "n": 100,
                "x": false,
                "q": "1.0000",
                "V": "500",
                "Q": "0.500",
                "B": "123456"
            }
        });

        let event: EventCandlestick = serde_json::from_value(value).unwrap();
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.candle.interval, CandleInterval::M1);
        assert_eq!(event.candle.start_time, 1638747660000);
        assert_eq!(event.candle.close, dec!(0.0020));
        assert_eq!(event.candle.number_of_trades, 100);
        assert!(!event.candle.is_closed);
    }

    #[test]
    fn test_dispatch_book_ticker() {
        let event = StreamEvent::from_value(&book_ticker("1", "1", 7)).unwrap();
        assert!(matches!(event, StreamEvent::TickPrice(t) if t.update_id == 7));
    }

    #[test]
    fn test_dispatch_order_update() {
        let value = json!({
            "e": "ORDER_TRADE_UPDATE",
            "E": 1568879465651i64,
            "T": 1568879465650i64,
            "o": {
                "s": "BTCUSDT",
                "c": "TEST",
                "S": "SELL",
                "o": "TRAILING_STOP_MARKET",
                "f": "GTC",
                "q": "0.001",
                "p": "0",
                "ap": "0",
                "sp": "7103.04",
                "x": "NEW",
                "X": "NEW",
                "i": 8886774,
                "l": "0",
                "z": "0",
                "L": "0",
                "T": 1568879465650i64,
                "t": 0,
                "b": "0",
                "a": "9.91",
                "m": false,
                "R": false,
                "wt": "CONTRACT_PRICE",
                "ot": "TRAILING_STOP_MARKET",
                "ps": "LONG",
                "cp": false,
                "AP": "7476.89",
                "cr": "5.0",
                "rp": "0"
            }
        });

        match StreamEvent::from_value(&value).unwrap() {
            StreamEvent::OrderUpdate(order) => {
                assert_eq!(order.symbol, "BTCUSDT");
                assert_eq!(order.side, "SELL");
                assert_eq!(order.order_id, 8886774);
                assert_eq!(order.stop_price, dec!(7103.04));
                assert_eq!(order.callback_rate, dec!(5.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_account_events() {
        let balance = json!({"e": "ACCOUNT_CONFIG_UPDATE", "E": 10, "a": {"s": "BTCUSDT", "l": 25}});
        assert!(matches!(
            StreamEvent::from_value(&balance).unwrap(),
            StreamEvent::BalanceUpdate(b) if b.event_time == 10
        ));

        let account = json!({"e": "ACCOUNT_UPDATE", "E": 11, "ac": {"m": "ORDER"}});
        assert!(matches!(
            StreamEvent::from_value(&account).unwrap(),
            StreamEvent::AccountUpdate(a) if a.payload["m"] == "ORDER"
        ));
    }

    #[test]
    fn test_dispatch_unknown_is_generic() {
        let expired = json!({"e": "listenKeyExpired", "E": 1576653824250i64});
        assert_eq!(
            StreamEvent::from_value(&expired).unwrap(),
            StreamEvent::Generic(EventHeader {
                event_type: "listenKeyExpired".to_string(),
                event_time: 1576653824250,
            })
        );

        let unknown = json!({"e": "somethingNew"});
        assert!(matches!(
            StreamEvent::from_value(&unknown).unwrap(),
            StreamEvent::Generic(_)
        ));

        // 본문이 없는 사용자 데이터 이벤트
        let empty = json!({"e": "ORDER_TRADE_UPDATE", "E": 1});
        assert!(matches!(
            StreamEvent::from_value(&empty).unwrap(),
            StreamEvent::Generic(_)
        ));
    }
}
