//! 거래소 메타데이터 TTL 캐시.
//!
//! 심볼 목록과 요청 한도 설명자를 보관하고, 심볼별 정밀도 조회에 사용합니다.
//! 스냅샷은 비어 있거나 TTL(1시간)이 지나면 다음 사용 전에 갱신됩니다.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ExchangeResult;
use crate::http::{Security, SignedRequestExecutor};
use crate::models::{ExchangeInfo, PrecisionKind};

/// 메타데이터 유효 기간.
pub const METADATA_TTL: Duration = Duration::from_secs(3600);

/// 심볼을 찾지 못했을 때의 정밀도.
pub const DEFAULT_PRECISION: u32 = 1;

/// 메타데이터 공급자.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `exchangeInfo`를 조회합니다.
    async fn fetch_exchange_info(&self) -> ExchangeResult<ExchangeInfo>;
}

#[async_trait]
impl MetadataSource for SignedRequestExecutor {
    async fn fetch_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        self.get("exchangeInfo", &[], Security::Public).await
    }
}

/// 갱신 시각이 찍힌 메타데이터.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub info: ExchangeInfo,
    pub refreshed_at: Option<Instant>,
}

impl MetadataSnapshot {
    /// 심볼 목록이 비었거나, 갱신된 적이 없거나, TTL이 지났으면 오래된 것으로 봅니다.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match self.refreshed_at {
            _ if self.info.symbols.is_empty() => true,
            Some(at) => at.elapsed() > ttl,
            None => true,
        }
    }
}

/// 메타데이터 캐시.
#[derive(Debug)]
pub struct MetadataCache {
    snapshot: RwLock<MetadataSnapshot>,
    ttl: Duration,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::with_ttl(METADATA_TTL)
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            snapshot: RwLock::new(MetadataSnapshot::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot.read().is_stale(self.ttl)
    }

    /// 캐시된 메타데이터를 반환합니다.
    ///
    /// 비었거나 오래되었거나 `force`이면 공급자에서 다시 받아 교체합니다.
    pub async fn snapshot<S>(&self, source: &S, force: bool) -> ExchangeResult<ExchangeInfo>
    where
        S: MetadataSource + ?Sized,
    {
        if !force {
            let snapshot = self.snapshot.read();
            if !snapshot.is_stale(self.ttl) {
                return Ok(snapshot.info.clone());
            }
        }

        // 네트워크 요청 동안에는 잠금을 잡지 않는다
        let info = source.fetch_exchange_info().await?;
        debug!(symbols = info.symbols.len(), "Exchange metadata refreshed");
        self.set_exchange_info(info.clone());
        Ok(info)
    }

    /// 메타데이터를 직접 설정합니다. 갱신 시각은 현재로 기록됩니다.
    pub fn set_exchange_info(&self, info: ExchangeInfo) {
        *self.snapshot.write() = MetadataSnapshot {
            info,
            refreshed_at: Some(Instant::now()),
        };
    }

    /// 심볼의 정밀도를 조회합니다.
    ///
    /// 오래된 스냅샷이면 먼저 갱신하고, 심볼이 없으면 [`DEFAULT_PRECISION`]을 반환합니다.
    /// 갱신 실패는 기록만 하고 남아 있는 스냅샷으로 조회합니다.
    pub async fn precision_for<S>(&self, source: &S, kind: PrecisionKind, symbol: &str) -> u32
    where
        S: MetadataSource + ?Sized,
    {
        if self.is_stale() {
            if let Err(e) = self.snapshot(source, true).await {
                warn!(error = %e, "Exchange metadata refresh failed");
            }
        }

        self.snapshot
            .read()
            .info
            .find_symbol(symbol)
            .map(|info| info.precision(kind))
            .unwrap_or(DEFAULT_PRECISION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::models::SymbolInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        async fn fetch_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExchangeError::NetworkError("down".to_string()));
            }
            Ok(info())
        }
    }

    fn info() -> ExchangeInfo {
        ExchangeInfo {
            symbols: vec![SymbolInfo {
                symbol: "BTCUSDT".to_string(),
                price_precision: 2,
                quantity_precision: 3,
                quote_precision: 8,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_cached_within_ttl() {
        let cache = MetadataCache::new();
        let source = FakeSource::new();

        cache.snapshot(&source, false).await.unwrap();
        cache.snapshot(&source, false).await.unwrap();
        assert_eq!(source.calls(), 1);

        cache.snapshot(&source, true).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_refreshed_after_ttl() {
        let cache = MetadataCache::new();
        let source = FakeSource::new();

        cache.snapshot(&source, false).await.unwrap();
        tokio::time::advance(Duration::from_secs(3599)).await;
        cache.snapshot(&source, false).await.unwrap();
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_stale());
        cache.snapshot(&source, false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_precision_lookup() {
        let cache = MetadataCache::new();
        let source = FakeSource::new();

        assert_eq!(cache.precision_for(&source, PrecisionKind::Price, "BTCUSDT").await, 2);
        assert_eq!(cache.precision_for(&source, PrecisionKind::Quantity, "BTCUSDT").await, 3);
        assert_eq!(cache.precision_for(&source, PrecisionKind::Quote, "BTCUSDT").await, 8);
        assert_eq!(source.calls(), 1);

        // 대소문자 구분, 없는 심볼은 기본값
        assert_eq!(cache.precision_for(&source, PrecisionKind::Price, "btcusdt").await, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_snapshot_skips_fetch() {
        let cache = MetadataCache::new();
        let source = FakeSource {
            calls: AtomicUsize::new(0),
            fail: true,
        };

        cache.set_exchange_info(info());
        assert_eq!(cache.precision_for(&source, PrecisionKind::Price, "BTCUSDT").await, 2);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_falls_back_to_default() {
        let cache = MetadataCache::new();
        let source = FakeSource {
            calls: AtomicUsize::new(0),
            fail: true,
        };

        assert_eq!(cache.precision_for(&source, PrecisionKind::Price, "BTCUSDT").await, 1);
        assert!(cache.snapshot(&source, false).await.is_err());
    }
}
