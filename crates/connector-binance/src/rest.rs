//! REST 클라이언트.
//!
//! 서명 요청 실행기와 메타데이터 캐시를 묶고, 긴 기간의 과거 데이터를
//! 여러 페이지로 나누어 조회하는 도우미를 제공합니다.
//!
//! # 페이지네이션
//!
//! - 캔들, 펀딩 비율: 마지막 레코드의 시각부터 앞으로 진행
//! - 통계(미결제약정, 롱/숏 비율, 테이커 거래량): 500개씩 과거 방향으로 진행
//!
//! 페이지 요청이 실패하면 기록만 하고 그때까지 모은 결과를 반환합니다.

use std::collections::HashMap;
use std::sync::Arc;

use connector_core::{CandleInterval, Credentials, RestConfig, StatisticsPeriod};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ExchangeError, ExchangeResult};
use crate::http::{Security, SignedRequestExecutor};
use crate::metadata::MetadataCache;
use crate::models::{
    BuySellVolume, Candle, ExchangeInfo, FundingRate, LongShortRatio, OpenInterestStatistics,
    PrecisionKind, ServerTime,
};

/// 통계 엔드포인트 한 페이지의 크기.
const STATISTICS_PAGE_LIMIT: u32 = 500;

const OPEN_INTEREST_HIST_PATH: &str = "/futures/data/openInterestHist";
const LONG_SHORT_RATIO_PATH: &str = "/futures/data/globalLongShortAccountRatio";
const TAKER_VOLUME_PATH: &str = "/futures/data/takerlongshortRatio";

/// 시각 기준으로 페이지네이션되는 통계 레코드.
trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for OpenInterestStatistics {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for LongShortRatio {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for BuySellVolume {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Binance USDⓈ-M 선물 REST 클라이언트.
pub struct RestClient {
    config: RestConfig,
    executor: RwLock<Arc<SignedRequestExecutor>>,
    metadata: MetadataCache,
}

impl RestClient {
    /// 새 클라이언트를 생성합니다.
    pub fn new(config: RestConfig, credentials: Credentials) -> ExchangeResult<Self> {
        let executor = SignedRequestExecutor::new(&config, credentials)?;
        Ok(Self {
            config,
            executor: RwLock::new(Arc::new(executor)),
            metadata: MetadataCache::new(),
        })
    }

    /// 자격증명을 교체합니다.
    ///
    /// 실행기를 새로 만들기 때문에 사용 가중치와 가중치 한도도 기본값으로 돌아갑니다.
    pub fn set_credentials(&self, credentials: Credentials) -> ExchangeResult<()> {
        let executor = SignedRequestExecutor::new(&self.config, credentials)?;
        *self.executor.write() = Arc::new(executor);
        info!("REST credentials replaced");
        Ok(())
    }

    /// 엔드포인트 계층이 사용하는 현재 실행기.
    pub fn executor(&self) -> Arc<SignedRequestExecutor> {
        Arc::clone(&self.executor.read())
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// 마지막 응답이 보고한 사용 가중치.
    pub fn used_weight(&self) -> u32 {
        self.executor().used_weight()
    }

    /// 가중치 한도를 설정합니다 (주어진 값의 95%).
    pub fn set_weight_limit(&self, limit: u32) {
        self.executor().set_weight_limit(limit);
    }

    /// 거래소 메타데이터. 비었거나 오래되었거나 `force`이면 다시 받습니다.
    pub async fn get_exchange_info(&self, force: bool) -> ExchangeResult<ExchangeInfo> {
        let executor = self.executor();
        self.metadata.snapshot(executor.as_ref(), force).await
    }

    /// 메타데이터를 직접 설정합니다.
    pub fn set_exchange_info(&self, info: ExchangeInfo) {
        self.metadata.set_exchange_info(info);
    }

    /// 심볼의 정밀도. 심볼이 없으면 1.
    pub async fn precision_for(&self, kind: PrecisionKind, symbol: &str) -> u32 {
        let executor = self.executor();
        self.metadata
            .precision_for(executor.as_ref(), kind, symbol)
            .await
    }

    /// 서버 시각 (밀리초).
    pub async fn get_server_time(&self) -> ExchangeResult<i64> {
        let time: ServerTime = self
            .executor()
            .get("time", &[], Security::Public)
            .await?;
        Ok(time.server_time)
    }

    /// 가장 최근 펀딩 비율.
    pub async fn get_last_funding_rate(&self, symbol: &str) -> ExchangeResult<FundingRate> {
        if symbol.is_empty() {
            return Err(ExchangeError::InvalidParameter(
                "symbol must be specified".to_string(),
            ));
        }

        let params = [("symbol", symbol.to_string())];
        let rates: Vec<FundingRate> = self
            .executor()
            .get("fundingRate", &params, Security::Public)
            .await?;

        rates
            .into_iter()
            .max_by_key(|rate| rate.funding_time)
            .ok_or_else(|| ExchangeError::ParseError(format!("no funding rate for {}", symbol)))
    }

    /// 캔들 한 페이지.
    pub async fn get_historical_prices_single(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Candle>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
        ];
        push_range(&mut params, start_time, end_time, limit);

        self.executor()
            .get("klines", &params, Security::Public)
            .await
    }

    /// `start_time`부터 `end_time`까지의 캔들.
    ///
    /// 다음 페이지는 마지막 캔들의 종료 시각부터 시작하며 빈 페이지에서 멈춥니다.
    /// 마지막 캔들은 아직 닫히지 않았을 수 있으므로 결과에서 제외합니다.
    pub async fn get_historical_prices(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_time: i64,
        end_time: i64,
        limit: Option<u32>,
    ) -> Vec<Candle> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = start_time;

        while cursor < end_time {
            let page = match self
                .get_historical_prices_single(symbol, interval, Some(cursor), Some(end_time), limit)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(symbol, cursor, error = %e, "Candle page request failed");
                    break;
                }
            };

            let Some(last) = page.last() else {
                break;
            };
            let next = last.close_time;
            candles.extend(page);

            if next <= cursor {
                break;
            }
            cursor = next;
        }

        candles.pop();
        debug!(symbol, interval = %interval, count = candles.len(), "Candle history fetched");
        candles
    }

    /// 여러 심볼의 캔들을 동시에 조회합니다.
    pub async fn get_historical_prices_for_symbols(
        &self,
        symbols: &[String],
        interval: CandleInterval,
        start_time: i64,
        end_time: i64,
        limit: Option<u32>,
    ) -> HashMap<String, Vec<Candle>> {
        let futures = symbols.iter().map(|symbol| async move {
            let candles = self
                .get_historical_prices(symbol, interval, start_time, end_time, limit)
                .await;
            (symbol.clone(), candles)
        });

        join_all(futures).await.into_iter().collect()
    }

    async fn funding_rate_page(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<FundingRate>> {
        let mut params = vec![("symbol", symbol.to_string())];
        push_range(&mut params, Some(start_time), Some(end_time), limit);

        self.executor()
            .get("fundingRate", &params, Security::Public)
            .await
    }

    /// `start_time`부터 `end_time`까지의 펀딩 비율.
    ///
    /// 다음 페이지는 마지막 레코드의 펀딩 시각부터 시작합니다.
    /// 한 건짜리 페이지가 커서와 같은 시각을 돌려주면 멈춥니다.
    pub async fn get_funding_rates(
        &self,
        symbol: &str,
        start_time: i64,
        end_time: i64,
        limit: Option<u32>,
    ) -> Vec<FundingRate> {
        let mut rates: Vec<FundingRate> = Vec::new();
        let mut cursor = start_time;
        let mut first_page = true;

        while cursor < end_time {
            let page = match self.funding_rate_page(symbol, cursor, end_time, limit).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(symbol, cursor, error = %e, "Funding rate page request failed");
                    break;
                }
            };

            if !first_page && page.len() == 1 && page[0].funding_time == cursor {
                break;
            }

            // 경계 레코드는 이전 페이지에 이미 있다
            let fresh: Vec<FundingRate> = page
                .into_iter()
                .filter(|rate| first_page || rate.funding_time > cursor)
                .collect();
            first_page = false;

            let Some(last) = fresh.last() else {
                break;
            };
            cursor = last.funding_time;
            rates.extend(fresh);
        }

        debug!(symbol, count = rates.len(), "Funding rate history fetched");
        rates
    }

    /// `end_time` 이전의 미결제약정 통계 (과거 방향 페이지네이션).
    pub async fn get_open_interest_statistics(
        &self,
        symbol: &str,
        period: StatisticsPeriod,
        end_time: i64,
    ) -> Vec<OpenInterestStatistics> {
        self.statistics_history(OPEN_INTEREST_HIST_PATH, symbol, period, end_time)
            .await
    }

    /// `end_time` 이전의 롱/숏 계정 비율.
    pub async fn get_long_short_ratio(
        &self,
        symbol: &str,
        period: StatisticsPeriod,
        end_time: i64,
    ) -> Vec<LongShortRatio> {
        self.statistics_history(LONG_SHORT_RATIO_PATH, symbol, period, end_time)
            .await
    }

    /// `end_time` 이전의 테이커 매수/매도 거래량.
    pub async fn get_buy_sell_volume(
        &self,
        symbol: &str,
        period: StatisticsPeriod,
        end_time: i64,
    ) -> Vec<BuySellVolume> {
        self.statistics_history(TAKER_VOLUME_PATH, symbol, period, end_time)
            .await
    }

    /// 커서 이전의 500개씩 받아 앞쪽에 붙이고, 커서를 첫 레코드 시각 - 1로 옮깁니다.
    async fn statistics_history<T>(
        &self,
        path: &str,
        symbol: &str,
        period: StatisticsPeriod,
        end_time: i64,
    ) -> Vec<T>
    where
        T: DeserializeOwned + Timestamped,
    {
        let mut records: Vec<T> = Vec::new();
        let mut cursor = end_time;

        loop {
            let page: Vec<T> = self.statistics_page(path, symbol, period, cursor).await;
            let Some(first) = page.first() else {
                break;
            };

            let next = first.timestamp() - 1;
            let later = std::mem::replace(&mut records, page);
            records.extend(later);

            if next >= cursor {
                break;
            }
            cursor = next;
        }

        debug!(path, symbol, count = records.len(), "Statistics history fetched");
        records
    }

    async fn statistics_page<T: DeserializeOwned>(
        &self,
        path: &str,
        symbol: &str,
        period: StatisticsPeriod,
        end_time: i64,
    ) -> Vec<T> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("period", period.as_str().to_string()),
        ];
        push_range(&mut params, None, Some(end_time), Some(STATISTICS_PAGE_LIMIT));

        match self.executor().get_futures(path, &params).await {
            Ok(page) => page,
            Err(e) => {
                warn!(path, symbol, end_time, error = %e, "Statistics page request failed");
                Vec::new()
            }
        }
    }
}

fn push_range(
    params: &mut Vec<(&'static str, String)>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    limit: Option<u32>,
) {
    if let Some(start) = start_time {
        params.push(("startTime", start.to_string()));
    }
    if let Some(end) = end_time {
        params.push(("endTime", end.to_string()));
    }
    if let Some(limit) = limit {
        params.push(("limit", limit.to_string()));
    }
}
