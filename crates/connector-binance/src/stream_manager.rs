//! 스트림 이벤트 캐시와 폴링 읽기.
//!
//! 세션 풀이 전달하는 푸시 이벤트를 심볼별 최신/직전 상태로 병합하고,
//! 호출자는 타임아웃이 있는 폴링으로 값을 읽습니다.
//!
//! # 동작
//!
//! - 최우선 호가: 가격과 시각은 최신 값으로 덮어쓰고 수량은 읽을 때까지 누적
//! - 캔들: 같은 구간이면 덮어쓰고, 구간 시작 시각이 바뀌면 기존 값을 직전 캔들로 승격

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use connector_core::{CandleInterval, LogSink, SinkLogger, StreamConfig};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ExchangeResult;
use crate::events::{EventCandlestick, EventTickPrice};
use crate::websocket::{MessageHandler, SessionPool};

/// 폴링 간격.
const POLL_INTERVAL: Duration = Duration::from_millis(3);

type CandleKey = (String, CandleInterval);

#[derive(Debug, Default)]
struct CandleStore {
    current: HashMap<CandleKey, EventCandlestick>,
    historic: HashMap<CandleKey, EventCandlestick>,
}

/// 푸시 이벤트 캐시.
///
/// 호가 저장소와 캔들 저장소는 각각 별도의 잠금을 가집니다.
#[derive(Debug, Default)]
pub struct EventCache {
    ticks: Mutex<HashMap<String, EventTickPrice>>,
    candles: Mutex<CandleStore>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 최우선 호가 이벤트를 병합합니다.
    pub fn merge_tick_price(&self, event: EventTickPrice) {
        let mut ticks = self.ticks.lock();
        match ticks.get_mut(&event.symbol) {
            Some(existing) => existing.merge(&event),
            None => {
                ticks.insert(event.symbol.clone(), event);
            }
        }
    }

    /// 캔들 이벤트를 병합합니다.
    pub fn merge_candlestick(&self, event: EventCandlestick) {
        let key = (event.symbol.clone(), event.candle.interval);
        let mut store = self.candles.lock();

        let previous = store
            .current
            .get(&key)
            .filter(|on_file| on_file.candle.start_time != event.candle.start_time)
            .cloned();

        store.current.insert(key.clone(), event);
        if let Some(previous) = previous {
            store.historic.insert(key, previous);
        }
    }

    /// 최우선 호가를 읽습니다.
    ///
    /// 읽을 때마다 누적 수량을 초기화하고, `consume`이면 항목을 제거합니다.
    pub fn take_tick_price(&self, symbol: &str, consume: bool) -> Option<EventTickPrice> {
        let mut ticks = self.ticks.lock();
        if consume {
            return ticks.remove(symbol);
        }
        let entry = ticks.get_mut(symbol)?;
        let snapshot = entry.clone();
        entry.reset_quantities();
        Some(snapshot)
    }

    /// 현재 캔들 또는 직전 캔들의 복사본.
    pub fn candlestick(
        &self,
        symbol: &str,
        interval: CandleInterval,
        previous: bool,
    ) -> Option<EventCandlestick> {
        let store = self.candles.lock();
        let key = (symbol.to_string(), interval);
        if previous {
            store.historic.get(&key).cloned()
        } else {
            store.current.get(&key).cloned()
        }
    }
}

/// 세션 풀과 이벤트 캐시를 묶는 스트림 매니저.
pub struct StreamManager {
    pool: SessionPool,
    cache: Arc<EventCache>,
    logger: SinkLogger,
    timeout_ms: AtomicU64,
}

impl StreamManager {
    /// 새 매니저를 생성합니다. 폴링 타임아웃은 `config.read_timeout_secs`로 시작합니다.
    pub fn new(config: StreamConfig, cache: Arc<EventCache>) -> ExchangeResult<Self> {
        let logger = SinkLogger::new();
        let timeout_ms = config.read_timeout().as_millis() as u64;
        let pool = SessionPool::with_logger(config, logger.clone())?;

        Ok(Self {
            pool,
            cache,
            logger,
            timeout_ms: AtomicU64::new(timeout_ms),
        })
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// 최우선 호가 스트림을 구독합니다.
    pub fn subscribe_book_ticker_stream(&self, symbol: &str, force: bool) -> ExchangeResult<()> {
        let name = SessionPool::compose_stream_name(symbol, "bookTicker");
        if !force && self.pool.find_stream(&name) {
            return Ok(());
        }
        self.announce(&name);

        let cache = Arc::clone(&self.cache);
        let logger = self.logger.clone();
        let on_message: MessageHandler = Arc::new(move |value: Value| {
            match serde_json::from_value::<EventTickPrice>(value) {
                Ok(event) => cache.merge_tick_price(event),
                Err(e) => logger.error(&format!("book ticker parse failed: {}", e)),
            }
        });

        self.pool.book_ticker(symbol, on_message, force)?;
        self.pool.run()
    }

    /// 캔들 스트림을 구독합니다.
    pub fn subscribe_candlestick_stream(
        &self,
        symbol: &str,
        interval: CandleInterval,
        force: bool,
    ) -> ExchangeResult<()> {
        let name = SessionPool::compose_stream_name(symbol, &format!("kline_{}", interval));
        if !force && self.pool.find_stream(&name) {
            return Ok(());
        }
        self.announce(&name);

        let cache = Arc::clone(&self.cache);
        let logger = self.logger.clone();
        let on_message: MessageHandler = Arc::new(move |value: Value| {
            match serde_json::from_value::<EventCandlestick>(value) {
                Ok(event) => cache.merge_candlestick(event),
                Err(e) => logger.error(&format!("candlestick parse failed: {}", e)),
            }
        });

        self.pool.candlestick(symbol, interval, on_message, force)?;
        self.pool.run()
    }

    fn announce(&self, name: &str) {
        info!(stream = %name, "Subscribing");
        if self.logger.has_sink() {
            self.logger.info(&format!("subscribing: {}", name));
        }
    }

    /// 최우선 호가를 폴링합니다. 타임아웃 안에 값이 없으면 `None`.
    pub fn read_event_tick_price(&self, symbol: &str, consume: bool) -> Option<EventTickPrice> {
        self.poll(|| self.cache.take_tick_price(symbol, consume))
    }

    /// 현재 캔들(`previous == false`) 또는 직전 캔들을 폴링합니다.
    pub fn read_event_candlestick(
        &self,
        symbol: &str,
        interval: CandleInterval,
        previous: bool,
    ) -> Option<EventCandlestick> {
        self.poll(|| self.cache.candlestick(symbol, interval, previous))
    }

    /// 폴링 타임아웃을 설정합니다. 0이면 읽기가 즉시 `None`을 반환합니다.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    /// 외부 로거를 교체합니다. 풀과 세션에도 반영됩니다.
    pub fn set_logger_callback(&self, sink: Option<LogSink>) {
        self.pool.set_logger_callback(sink);
    }

    fn poll<T>(&self, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        let timeout = self.timeout();
        if timeout.is_zero() {
            return None;
        }
        let deadline = Instant::now() + timeout;

        loop {
            // 해제 중이면 더 기다리지 않는다
            if self.timeout().is_zero() {
                return None;
            }
            if let Some(value) = probe() {
                return Some(value);
            }
            if Instant::now() >= deadline {
                debug!(timeout_ms = timeout.as_millis() as u64, "Read timed out");
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.set_timeout(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn tick(bid_qty: &str, ask_qty: &str, update_id: i64) -> EventTickPrice {
        serde_json::from_value(json!({
            "e": "bookTicker", "u": update_id, "E": 1000 + update_id, "T": 900 + update_id,
            "s": "BTCUSDT", "b": "100.5", "B": bid_qty, "a": "100.6", "A": ask_qty
        }))
        .unwrap()
    }

    fn kline(start: i64, close: &str) -> EventCandlestick {
        serde_json::from_value(json!({
            "e": "kline", "E": start + 1, "s": "BTCUSDT",
            "k": {
                "t": start, "T": start + 59_999, "s": "BTCUSDT", "i": "1m",
                "f": 1, "L": 2, "o": "1", "c": close, "h": "2", "l": "0.5",
                "v": "10", "n": 2, "x": false, "q": "10", "V": "5", "Q": "5", "B": "0"
            }
        }))
        .unwrap()
    }

    fn manager(cache: Arc<EventCache>) -> StreamManager {
        StreamManager::new(StreamConfig::local(1), cache).unwrap()
    }

    #[test]
    fn test_tick_quantities_accumulate_until_read() {
        let cache = EventCache::new();
        cache.merge_tick_price(tick("1", "2", 1));
        cache.merge_tick_price(tick("3", "4", 2));

        let read = cache.take_tick_price("BTCUSDT", false).unwrap();
        assert_eq!(read.bid_qty, dec!(4));
        assert_eq!(read.ask_qty, dec!(6));
        assert_eq!(read.update_id, 2);
        assert_eq!(read.transaction_time, 902);

        let again = cache.take_tick_price("BTCUSDT", false).unwrap();
        assert_eq!(again.bid_qty, dec!(0));
        assert_eq!(again.bid_price, dec!(100.5));
    }

    #[test]
    fn test_tick_consume_removes_entry() {
        let cache = EventCache::new();
        cache.merge_tick_price(tick("1", "2", 1));
        assert!(cache.take_tick_price("BTCUSDT", true).is_some());
        assert!(cache.take_tick_price("BTCUSDT", false).is_none());
    }

    #[test]
    fn test_candle_promoted_once_on_new_bucket() {
        let cache = EventCache::new();
        cache.merge_candlestick(kline(0, "1.1"));
        cache.merge_candlestick(kline(0, "1.2"));
        assert!(cache.candlestick("BTCUSDT", CandleInterval::M1, true).is_none());

        cache.merge_candlestick(kline(60_000, "1.3"));
        let previous = cache.candlestick("BTCUSDT", CandleInterval::M1, true).unwrap();
        assert_eq!(previous.candle.start_time, 0);
        assert_eq!(previous.candle.close, dec!(1.2));

        cache.merge_candlestick(kline(60_000, "1.4"));
        let previous = cache.candlestick("BTCUSDT", CandleInterval::M1, true).unwrap();
        assert_eq!(previous.candle.close, dec!(1.2));
        let current = cache.candlestick("BTCUSDT", CandleInterval::M1, false).unwrap();
        assert_eq!(current.candle.close, dec!(1.4));
        assert!(cache.candlestick("BTCUSDT", CandleInterval::M5, false).is_none());
    }

    #[test]
    fn test_read_times_out_with_none() {
        let manager = manager(Arc::new(EventCache::new()));
        manager.set_timeout(Duration::from_millis(30));

        let started = Instant::now();
        assert!(manager.read_event_tick_price("BTCUSDT", false).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let cache = Arc::new(EventCache::new());
        cache.merge_tick_price(tick("1", "1", 1));
        let manager = manager(Arc::clone(&cache));
        manager.set_timeout(Duration::ZERO);

        assert!(manager.read_event_tick_price("BTCUSDT", false).is_none());
        assert!(manager
            .read_event_candlestick("BTCUSDT", CandleInterval::M1, false)
            .is_none());
    }

    #[test]
    fn test_read_sees_value_pushed_while_polling() {
        let cache = Arc::new(EventCache::new());
        let manager = manager(Arc::clone(&cache));
        manager.set_timeout(Duration::from_secs(2));

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cache.merge_candlestick(kline(0, "1.5"));
            })
        };

        let read = manager.read_event_candlestick("BTCUSDT", CandleInterval::M1, false);
        writer.join().unwrap();
        assert_eq!(read.unwrap().candle.close, dec!(1.5));
    }

    #[test]
    fn test_default_timeout_from_config() {
        let manager = manager(Arc::new(EventCache::new()));
        assert_eq!(manager.timeout(), Duration::from_secs(5));
    }
}
