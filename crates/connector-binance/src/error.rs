//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 연결 계층 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// DNS, TCP 연결, 요청 전송 실패
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 연결 또는 요청 제한 시간 초과
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// TLS 설정, SNI, 핸드셰이크 실패
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket 핸드셰이크/읽기/쓰기 실패
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 거래소가 반환한 에러 (`{code, msg}` 또는 HTTP 상태)
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 잘못된 호출 인자
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// 이미 시작된 세션을 다시 시작
    #[error("Session already started: {0}")]
    AlreadyStarted(String),

    /// 알 수 없는 에러
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    /// 세션을 종료시키는 전송 계층 에러인지 확인.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::Tls(_)
                | ExchangeError::WebSocket(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ExchangeError::NetworkError(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::Unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(e) => ExchangeError::NetworkError(e.to_string()),
            WsError::Tls(e) => ExchangeError::Tls(e.to_string()),
            other => ExchangeError::WebSocket(other.to_string()),
        }
    }
}

impl From<connector_core::CoreError> for ExchangeError {
    fn from(err: connector_core::CoreError) -> Self {
        ExchangeError::InvalidParameter(err.to_string())
    }
}
