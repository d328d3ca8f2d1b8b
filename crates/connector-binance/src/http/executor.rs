//! HMAC 서명과 가중치 기반 백프레셔를 갖춘 REST 요청 실행기.
//!
//! 요청마다 새 연결을 사용하며, 응답의 `X-MBX-USED-WEIGHT-1M` 헤더로
//! 사용 가중치를 추적합니다. 한도에 도달하면 서버 시계 기준으로
//! 다음 분이 시작될 때까지 호출자를 대기시킵니다.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use connector_core::{Credentials, RestConfig};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::ErrorResponse;

type HmacSha256 = Hmac<Sha256>;

const USED_WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// 요청 보안 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// 서명 없는 공개 요청
    Public,
    /// `recvWindow`, `timestamp`, `signature`가 추가되는 요청
    Signed,
}

/// REST API 버전 접두사.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    fn prefix(self) -> &'static str {
        match self {
            ApiVersion::V1 => "/fapi/v1/",
            ApiVersion::V2 => "/fapi/v2/",
        }
    }
}

/// 요청 가중치 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    /// 마지막 응답이 보고한 사용 가중치
    pub used_weight: u32,
    /// 대기를 시작하는 가중치
    pub ceiling: u32,
    /// 마지막 응답 시각의 분
    pub last_minute: u32,
    /// 마지막 응답 시각의 초
    pub last_second: u32,
}

impl RateBudget {
    fn new(ceiling: u32) -> Self {
        Self {
            used_weight: 0,
            ceiling,
            last_minute: 0,
            last_second: 0,
        }
    }

    /// 한도에 도달했으면 다음 분까지 남은 시간을 반환합니다.
    fn stall(&self) -> Option<Duration> {
        if self.used_weight >= self.ceiling {
            Some(Duration::from_secs(60u64.saturating_sub(self.last_second as u64)))
        } else {
            None
        }
    }
}

/// 한도의 `percent`%를 넘치지 않게 계산합니다.
fn scaled_limit(limit: u32, percent: u64) -> u32 {
    u32::try_from(u64::from(limit) * percent / 100).unwrap_or(u32::MAX)
}

/// HMAC-SHA256으로 쿼리 문자열을 서명합니다.
pub fn sign(secret: &str, query: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::InvalidParameter(format!("Invalid secret key: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 파라미터에서 쿼리 문자열 생성.
fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// 서명 요청 실행기.
pub struct SignedRequestExecutor {
    client: Client,
    credentials: Credentials,
    base_url: String,
    recv_window_ms: u64,
    budget: Mutex<RateBudget>,
}

impl SignedRequestExecutor {
    /// 새 실행기 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: &RestConfig, credentials: Credentials) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP client build failed: {}", e)))?;

        let ceiling = scaled_limit(config.weight_limit, 85);
        info!(weight_limit = ceiling, "API weight limit");

        Ok(Self {
            client,
            credentials,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            budget: Mutex::new(RateBudget::new(ceiling)),
        })
    }

    /// 마지막 응답이 보고한 사용 가중치.
    pub fn used_weight(&self) -> u32 {
        self.budget.lock().used_weight
    }

    /// 대기를 시작하는 가중치.
    pub fn weight_limit(&self) -> u32 {
        self.budget.lock().ceiling
    }

    /// 가중치 한도를 설정합니다. 실제 적용 값은 주어진 한도의 95%입니다.
    pub fn set_weight_limit(&self, limit: u32) {
        let ceiling = scaled_limit(limit, 95);
        self.budget.lock().ceiling = ceiling;
        info!(weight_limit = ceiling, "API weight limit changed");
    }

    /// 현재 가중치 상태 스냅샷.
    pub fn rate_budget(&self) -> RateBudget {
        *self.budget.lock()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// `/fapi/v1/` GET.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        security: Security,
    ) -> ExchangeResult<T> {
        let path = format!("{}{}", ApiVersion::V1.prefix(), endpoint);
        self.execute(Method::GET, &path, params, None, security).await
    }

    /// `/fapi/v2/` GET.
    pub async fn get_v2<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        security: Security,
    ) -> ExchangeResult<T> {
        let path = format!("{}{}", ApiVersion::V2.prefix(), endpoint);
        self.execute(Method::GET, &path, params, None, security).await
    }

    /// 절대 경로 공개 GET (`/futures/data/...`).
    pub async fn get_futures<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        self.execute(Method::GET, path, params, None, Security::Public).await
    }

    /// `/fapi/v1/` POST. `body`는 JSON 문자열로 그대로 전송됩니다.
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&str>,
        security: Security,
    ) -> ExchangeResult<T> {
        let path = format!("{}{}", ApiVersion::V1.prefix(), endpoint);
        self.execute(Method::POST, &path, params, body, security).await
    }

    /// `/fapi/v1/` PUT. `body`는 JSON 문자열로 그대로 전송됩니다.
    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&str>,
        security: Security,
    ) -> ExchangeResult<T> {
        let path = format!("{}{}", ApiVersion::V1.prefix(), endpoint);
        self.execute(Method::PUT, &path, params, body, security).await
    }

    /// `/fapi/v1/` DELETE.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        security: Security,
    ) -> ExchangeResult<T> {
        let path = format!("{}{}", ApiVersion::V1.prefix(), endpoint);
        self.execute(Method::DELETE, &path, params, None, security).await
    }

    /// 쿼리 문자열을 만들고 필요하면 서명합니다.
    fn query_string(&self, params: &[(&str, String)], security: Security) -> ExchangeResult<String> {
        match security {
            Security::Public => Ok(build_query(params)),
            Security::Signed => {
                let mut all_params = params.to_vec();
                all_params.push(("recvWindow", self.recv_window_ms.to_string()));
                all_params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

                let query = build_query(&all_params);
                let signature = sign(self.credentials.api_secret(), &query)?;
                Ok(format!("{}&signature={}", query, signature))
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&str>,
        security: Security,
    ) -> ExchangeResult<T> {
        let query = self.query_string(params, security)?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!(method = %method, path, signed = security == Security::Signed, "REST request");

        let mut request = self.client.request(method, &url);
        if !self.credentials.api_key().is_empty() {
            request = request.header(API_KEY_HEADER, self.credentials.api_key());
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = request.send().await?;
        self.record_budget(&response);

        // 응답을 호출자에게 넘기기 전에 다음 분까지 대기
        let stall = self.budget.lock().stall();
        if let Some(wait) = stall {
            warn!(
                seconds = wait.as_secs(),
                "Weight limit reached, waiting for reset"
            );
            tokio::time::sleep(wait).await;
        }

        self.handle_response(response).await
    }

    /// 응답 헤더에서 사용 가중치와 서버 시각을 기록합니다.
    fn record_budget(&self, response: &Response) {
        let headers = response.headers();

        let used_weight = headers
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());

        let server_time = headers
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok());

        let mut budget = self.budget.lock();
        if let Some(weight) = used_weight {
            budget.used_weight = weight;
        }
        match server_time {
            Some(time) => {
                budget.last_minute = time.minute();
                budget.last_second = time.second();
            }
            None => {
                let now = Utc::now();
                budget.last_minute = now.minute();
                budget.last_second = now.second();
            }
        }
    }

    /// API 응답 처리.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ExchangeResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::ParseError(e.to_string())
            })
        } else {
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => Err(ExchangeError::ApiError {
                    code: err.code,
                    message: err.msg,
                }),
                Err(_) => Err(ExchangeError::ApiError {
                    code: status.as_u16() as i32,
                    message: body,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign() {
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = sign(
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
            query,
        )
        .unwrap();

        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_build_query() {
        let params = [("symbol", "BTCUSDT".to_string()), ("limit", "5".to_string())];
        assert_eq!(build_query(&params), "symbol=BTCUSDT&limit=5");
        assert_eq!(build_query(&[]), "");
    }

    #[test]
    fn test_weight_limits() {
        let executor =
            SignedRequestExecutor::new(&RestConfig::default(), Credentials::anonymous()).unwrap();
        assert_eq!(executor.weight_limit(), 2040);
        assert_eq!(executor.used_weight(), 0);

        executor.set_weight_limit(1200);
        assert_eq!(executor.weight_limit(), 1140);
    }

    #[test]
    fn test_configured_weight_limit_sets_ceiling() {
        let config = RestConfig {
            weight_limit: 100,
            ..RestConfig::default()
        };
        let executor = SignedRequestExecutor::new(&config, Credentials::anonymous()).unwrap();
        assert_eq!(executor.weight_limit(), 85);
    }

    #[test]
    fn test_weight_limit_does_not_overflow() {
        let executor =
            SignedRequestExecutor::new(&RestConfig::default(), Credentials::anonymous()).unwrap();
        executor.set_weight_limit(u32::MAX);
        assert_eq!(executor.weight_limit(), 4_080_218_930);

        let config = RestConfig {
            weight_limit: u32::MAX,
            ..RestConfig::default()
        };
        let executor = SignedRequestExecutor::new(&config, Credentials::anonymous()).unwrap();
        assert_eq!(executor.weight_limit(), 3_650_722_200);
    }

    #[test]
    fn test_budget_stall() {
        let mut budget = RateBudget::new(100);
        budget.last_second = 45;
        budget.used_weight = 99;
        assert_eq!(budget.stall(), None);

        budget.used_weight = 100;
        assert_eq!(budget.stall(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_signed_query_layout() {
        let executor = SignedRequestExecutor::new(
            &RestConfig::default(),
            Credentials::new("key", "secret"),
        )
        .unwrap();

        let query = executor
            .query_string(&[("symbol", "BTCUSDT".to_string())], Security::Signed)
            .unwrap();

        assert!(query.starts_with("symbol=BTCUSDT&recvWindow=60000&timestamp="));
        let (unsigned, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, sign("secret", unsigned).unwrap());

        // 파라미터가 없어도 선행 구분자가 생기지 않는다
        let empty = executor.query_string(&[], Security::Signed).unwrap();
        assert!(empty.starts_with("recvWindow="));
    }
}
